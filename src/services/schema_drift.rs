//! Schema drift detection
//!
//! Compares incoming raw records against a registered set of expected field
//! names, fuzzy-matches probable renames and scores how well the record still
//! fits. Detection is advisory: it never changes the data and never fails
//! the batch it inspects.

use chrono::Utc;
use sea_orm::{ConnectionTrait, EntityTrait, Set, TransactionTrait};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, error, info, warn};

use crate::entities::{prelude::SchemaDriftLogs, schema_drift_logs};

/// Minimum similarity for two field names to count as a rename
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.7;
/// Drift when more than this share of expected fields is missing
pub const MISSING_FIELD_THRESHOLD: f64 = 0.5;
/// Drift when unexpected fields exceed this share of expected fields
pub const NEW_FIELD_THRESHOLD: f64 = 0.3;

pub const DEFAULT_SAMPLE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuzzyMatch {
    pub matched_to: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    pub schema_name: String,
    pub drift_detected: bool,
    pub confidence: f64,
    pub expected_fields: usize,
    pub matched_fields: usize,
    pub missing_fields: Vec<String>,
    pub extra_fields: Vec<String>,
    pub fuzzy_matches: BTreeMap<String, FuzzyMatch>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchDriftSummary {
    pub drift_detected: bool,
    pub sample_count: usize,
    pub drift_count: usize,
    pub drift_ratio: f64,
    pub average_confidence: f64,
    pub warnings: Vec<String>,
}

pub struct SchemaDriftDetector {
    source: String,
    expected_schemas: HashMap<String, BTreeSet<String>>,
}

impl SchemaDriftDetector {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            expected_schemas: HashMap::new(),
        }
    }

    pub fn register_schema<I, S>(&mut self, schema_name: &str, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: BTreeSet<String> = fields.into_iter().map(Into::into).collect();
        info!(
            source = %self.source,
            schema_name = %schema_name,
            field_count = fields.len(),
            "Registered expected schema"
        );
        self.expected_schemas.insert(schema_name.to_string(), fields);
    }

    pub fn is_registered(&self, schema_name: &str) -> bool {
        self.expected_schemas.contains_key(schema_name)
    }

    pub fn detect_drift(&self, schema_name: &str, record: &Map<String, Value>) -> DriftReport {
        let Some(expected) = self.expected_schemas.get(schema_name) else {
            warn!(source = %self.source, schema_name = %schema_name, "Schema not registered");
            return DriftReport {
                schema_name: schema_name.to_string(),
                drift_detected: false,
                confidence: 0.0,
                expected_fields: 0,
                matched_fields: 0,
                missing_fields: Vec::new(),
                extra_fields: Vec::new(),
                fuzzy_matches: BTreeMap::new(),
                warnings: vec![format!("Schema {} not registered", schema_name)],
            };
        };

        let actual: BTreeSet<String> = record.keys().cloned().collect();
        let missing: Vec<String> = expected.difference(&actual).cloned().collect();
        let extra: Vec<String> = actual.difference(expected).cloned().collect();
        let common = expected.intersection(&actual).count();

        let mut fuzzy_matches = BTreeMap::new();
        for field in &missing {
            if let Some((candidate, similarity)) = best_match(field, &extra) {
                if similarity >= FUZZY_MATCH_THRESHOLD {
                    fuzzy_matches.insert(
                        field.clone(),
                        FuzzyMatch {
                            matched_to: candidate.to_string(),
                            similarity,
                        },
                    );
                }
            }
        }

        let total = expected.len();
        let ratio = |n: usize| if total > 0 { n as f64 / total as f64 } else { 0.0 };
        let confidence = round3(ratio(common + fuzzy_matches.len()));
        let missing_ratio = ratio(missing.len());
        let extra_ratio = ratio(extra.len());

        let mut warnings = Vec::new();
        if missing_ratio > MISSING_FIELD_THRESHOLD {
            warnings.push(format!(
                "High missing field ratio: {:.1}% ({}/{} fields missing)",
                missing_ratio * 100.0,
                missing.len(),
                total
            ));
        }
        if extra_ratio > NEW_FIELD_THRESHOLD {
            warnings.push(format!(
                "High new field ratio: {:.1}% ({} unexpected fields)",
                extra_ratio * 100.0,
                extra.len()
            ));
        }
        for (old, found) in &fuzzy_matches {
            warnings.push(format!(
                "Possible field rename: '{}' -> '{}' (similarity: {:.1}%)",
                old,
                found.matched_to,
                found.similarity * 100.0
            ));
        }

        let drift_detected = missing_ratio > MISSING_FIELD_THRESHOLD
            || extra_ratio > NEW_FIELD_THRESHOLD
            || !fuzzy_matches.is_empty();

        if drift_detected {
            warn!(
                source = %self.source,
                schema_name = %schema_name,
                confidence,
                missing = ?missing,
                extra = ?extra,
                "Schema drift detected"
            );
        } else {
            debug!(source = %self.source, confidence, "No schema drift");
        }

        DriftReport {
            schema_name: schema_name.to_string(),
            drift_detected,
            confidence,
            expected_fields: total,
            matched_fields: common,
            missing_fields: missing,
            extra_fields: extra,
            fuzzy_matches,
            warnings,
        }
    }

    /// Inspect the front of a batch and persist the first drifting report.
    ///
    /// The event insert runs in a savepoint on `conn`; if it fails the error is
    /// logged and the caller's transaction stays usable.
    pub async fn analyze_batch<'a, C, I>(
        &self,
        conn: &C,
        schema_name: &str,
        records: I,
        run_id: Option<&str>,
        sample_size: usize,
    ) -> BatchDriftSummary
    where
        C: ConnectionTrait + TransactionTrait,
        I: IntoIterator<Item = &'a Map<String, Value>>,
    {
        let reports: Vec<DriftReport> = records
            .into_iter()
            .take(sample_size)
            .map(|record| self.detect_drift(schema_name, record))
            .collect();

        if reports.is_empty() {
            return BatchDriftSummary::default();
        }

        let summary = summarize(&reports);

        if let Some(first) = reports.iter().find(|r| r.drift_detected) {
            if let Err(e) = self.log_drift(conn, first, run_id).await {
                error!(source = %self.source, run_id = ?run_id, error = %e, "Failed to log drift event");
            }
        }

        info!(
            source = %self.source,
            sample_count = summary.sample_count,
            drift_count = summary.drift_count,
            drift_ratio = summary.drift_ratio,
            average_confidence = summary.average_confidence,
            "Batch drift analysis complete"
        );

        summary
    }

    async fn log_drift<C>(
        &self,
        conn: &C,
        report: &DriftReport,
        run_id: Option<&str>,
    ) -> Result<(), sea_orm::DbErr>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let savepoint = conn.begin().await?;

        let event = schema_drift_logs::ActiveModel {
            source: Set(self.source.clone()),
            run_id: Set(run_id.map(str::to_string)),
            schema_name: Set(report.schema_name.clone()),
            confidence_score: Set(Some(report.confidence)),
            missing_fields: Set(Some(serde_json::json!(report.missing_fields))),
            extra_fields: Set(Some(serde_json::json!(report.extra_fields))),
            fuzzy_matches: Set(Some(serde_json::json!(report.fuzzy_matches))),
            warnings: Set(Some(serde_json::json!(report.warnings))),
            detected_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        };
        SchemaDriftLogs::insert(event).exec(&savepoint).await?;
        savepoint.commit().await?;

        info!(source = %self.source, run_id = ?run_id, "Drift event logged");
        Ok(())
    }
}

fn summarize(reports: &[DriftReport]) -> BatchDriftSummary {
    let sample_count = reports.len();
    let drift_count = reports.iter().filter(|r| r.drift_detected).count();
    let average_confidence =
        reports.iter().map(|r| r.confidence).sum::<f64>() / sample_count as f64;

    let mut seen = BTreeSet::new();
    let warnings = reports
        .iter()
        .flat_map(|r| r.warnings.iter())
        .filter(|w| seen.insert(w.as_str()))
        .cloned()
        .collect();

    BatchDriftSummary {
        drift_detected: drift_count > 0,
        sample_count,
        drift_count,
        drift_ratio: drift_count as f64 / sample_count as f64,
        average_confidence: round3(average_confidence),
        warnings,
    }
}

/// Closest candidate by case-insensitive similarity ratio
fn best_match<'a>(field: &str, candidates: &'a [String]) -> Option<(&'a str, f64)> {
    let field = field.to_lowercase();
    let mut best: Option<(&str, f64)> = None;

    for candidate in candidates {
        let score = similarity_ratio(&field, &candidate.to_lowercase());
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((candidate.as_str(), score));
        }
    }

    best
}

/// Ratcliff/Obershelp ratio: `2 * M / T`, where `M` counts the characters in
/// the matching blocks and `T` is the combined length.
fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    2.0 * matched_chars(&a, &b) as f64 / total as f64
}

/// Take the longest common block, then recurse into the unmatched pieces on
/// either side of it.
fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((a_lo, a_hi, b_lo, b_hi)) = pending.pop() {
        let (i, j, size) = longest_block(a, b, (a_lo, a_hi), (b_lo, b_hi));
        if size == 0 {
            continue;
        }

        matched += size;
        if a_lo < i && b_lo < j {
            pending.push((a_lo, i, b_lo, j));
        }
        if i + size < a_hi && j + size < b_hi {
            pending.push((i + size, a_hi, j + size, b_hi));
        }
    }

    matched
}

/// Longest common run of `a[a_range]` and `b[b_range]` as `(i, j, len)`.
/// Ties go to the block that starts earliest in `a`, then in `b`.
fn longest_block(
    a: &[char],
    b: &[char],
    (a_lo, a_hi): (usize, usize),
    (b_lo, b_hi): (usize, usize),
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_len) = (a_lo, b_lo, 0);
    // run_len[k + 1]: length of the common run ending at b[b_lo + k]
    let mut run_len = vec![0usize; b_hi - b_lo + 1];

    for i in a_lo..a_hi {
        let mut next = vec![0usize; run_len.len()];
        for j in b_lo..b_hi {
            if a[i] != b[j] {
                continue;
            }
            let len = run_len[j - b_lo] + 1;
            next[j - b_lo + 1] = len;
            if len > best_len {
                best_i = i + 1 - len;
                best_j = j + 1 - len;
                best_len = len;
            }
        }
        run_len = next;
    }

    (best_i, best_j, best_len)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: &[&str]) -> Map<String, Value> {
        fields
            .iter()
            .map(|f| (f.to_string(), json!(1)))
            .collect()
    }

    fn detector() -> SchemaDriftDetector {
        let mut detector = SchemaDriftDetector::new("coingecko");
        detector.register_schema("test_schema", ["a", "b", "c", "d", "e"]);
        detector
    }

    #[test]
    fn test_exact_match_has_no_drift() {
        let report = detector().detect_drift("test_schema", &record(&["a", "b", "c", "d", "e"]));

        assert!(!report.drift_detected);
        assert_eq!(report.confidence, 1.0);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_two_of_five_missing_stays_below_threshold() {
        let report = detector().detect_drift("test_schema", &record(&["a", "b", "c"]));

        // 2/5 = 0.4 does not exceed the 0.5 missing ratio
        assert!(!report.drift_detected);
        assert!(report.confidence >= 0.5 && report.confidence <= 0.7);
        assert_eq!(report.confidence, 0.6);
        assert_eq!(report.missing_fields, vec!["d".to_string(), "e".to_string()]);
    }

    #[test]
    fn test_three_of_five_missing_is_drift() {
        let report = detector().detect_drift("test_schema", &record(&["a", "b"]));

        assert!(report.drift_detected);
        assert_eq!(report.confidence, 0.4);
        assert!(report.warnings[0].contains("High missing field ratio"));
        assert!(report.warnings[0].contains("3/5"));
    }

    #[test]
    fn test_extra_field_ratio_threshold() {
        // 1/5 = 0.2 extra is fine
        let fine = detector().detect_drift("test_schema", &record(&["a", "b", "c", "d", "e", "zz"]));
        assert!(!fine.drift_detected);

        // 2/5 = 0.4 extra crosses 0.3
        let noisy = detector().detect_drift(
            "test_schema",
            &record(&["a", "b", "c", "d", "e", "xx", "yy"]),
        );
        assert!(noisy.drift_detected);
        assert!(noisy.warnings.iter().any(|w| w.contains("High new field ratio")));
    }

    #[test]
    fn test_fuzzy_rename_detected() {
        let mut detector = SchemaDriftDetector::new("coingecko");
        detector.register_schema("markets", ["id", "symbol", "current_price"]);

        let report = detector.detect_drift("markets", &record(&["id", "symbol", "currentPrice"]));

        let found = report.fuzzy_matches.get("current_price").expect("rename candidate");
        assert_eq!(found.matched_to, "currentPrice");
        assert!(found.similarity >= FUZZY_MATCH_THRESHOLD);
        assert!(report.drift_detected);
        assert_eq!(report.confidence, 1.0);
        assert!(report.warnings.iter().any(|w| w.contains("Possible field rename")));
    }

    #[test]
    fn test_dropped_suffix_is_a_rename() {
        let mut detector = SchemaDriftDetector::new("csv");
        detector.register_schema("rows", ["id", "symbol", "volume_24h", "price"]);

        let report = detector.detect_drift("rows", &record(&["id", "symbol", "volume", "price"]));

        let found = report.fuzzy_matches.get("volume_24h").expect("rename candidate");
        assert_eq!(found.matched_to, "volume");
        assert_eq!(found.similarity, 0.75);
        assert!(report.drift_detected);
        assert_eq!(report.confidence, 1.0);
    }

    #[test]
    fn test_similarity_ratio() {
        assert_eq!(similarity_ratio("", ""), 1.0);
        assert_eq!(similarity_ratio("abc", ""), 0.0);
        assert_eq!(similarity_ratio("price", "price"), 1.0);
        assert_eq!(similarity_ratio("volume_24h", "volume"), 0.75);
        // "ab" then "d" match around the differing middle
        assert_eq!(similarity_ratio("abcd", "abxd"), 0.75);
        assert_eq!(similarity_ratio("current_price", "currentprice"), 24.0 / 25.0);
        assert!(similarity_ratio("price", "zzzzzz") < FUZZY_MATCH_THRESHOLD);
    }

    #[test]
    fn test_unrelated_extra_field_is_not_a_rename() {
        let mut detector = SchemaDriftDetector::new("csv");
        detector.register_schema("rows", ["id", "symbol", "name", "price"]);

        let report = detector.detect_drift("rows", &record(&["id", "symbol", "name", "zzzzzz"]));

        assert!(report.fuzzy_matches.is_empty());
    }

    #[test]
    fn test_unregistered_schema_is_advisory() {
        let report = detector().detect_drift("unknown", &record(&["a"]));

        assert!(!report.drift_detected);
        assert_eq!(report.confidence, 0.0);
        assert!(report.warnings[0].contains("not registered"));
    }

    #[test]
    fn test_summary_deduplicates_warnings() {
        let detector = detector();
        let reports = vec![
            detector.detect_drift("test_schema", &record(&["a"])),
            detector.detect_drift("test_schema", &record(&["a"])),
            detector.detect_drift("test_schema", &record(&["a", "b", "c", "d", "e"])),
        ];

        let summary = summarize(&reports);

        assert!(summary.drift_detected);
        assert_eq!(summary.sample_count, 3);
        assert_eq!(summary.drift_count, 2);
        assert!((summary.drift_ratio - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.warnings.len(), 1);
        assert_eq!(summary.average_confidence, round3((0.2 + 0.2 + 1.0) / 3.0));
    }
}
