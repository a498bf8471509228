use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

use crate::error::IngestError;
use crate::models::coin::truncate_chars;

const MAX_ERROR_BODY_CHARS: usize = 500;

/// Send a GET and decode its JSON body, classifying failures for the retry layer.
pub async fn send_json(request: RequestBuilder) -> Result<Value, IngestError> {
    let response = request
        .header("accept", "application/json")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }

    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| IngestError::Validation(format!("malformed JSON response: {}", e)))
}

fn status_error(status: StatusCode, body: &str) -> IngestError {
    let body = truncate_chars(body, MAX_ERROR_BODY_CHARS);
    if status == StatusCode::TOO_MANY_REQUESTS {
        IngestError::RateLimited(body)
    } else {
        IngestError::HttpStatus {
            status: status.as_u16(),
            body,
        }
    }
}
