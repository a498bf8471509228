//! Controlled fault injection for exercising pipeline recovery.
//!
//! The injector is handed to the pipeline explicitly; production wiring
//! leaves it out. Faults are real [`IngestError`] variants, so recovery code
//! cannot tell an injected failure from a genuine one.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sea_orm::DbErr;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Network,
    Database,
    Validation,
    Timeout,
    RateLimit,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Network => "network",
            FaultKind::Database => "database",
            FaultKind::Validation => "validation",
            FaultKind::Timeout => "timeout",
            FaultKind::RateLimit => "rate_limit",
        }
    }

    fn to_error(self, message: &str) -> IngestError {
        match self {
            FaultKind::Network => IngestError::Network(format!("{}: network error", message)),
            FaultKind::Database => {
                IngestError::Storage(DbErr::Custom(format!("{}: database error", message)))
            }
            FaultKind::Validation => {
                IngestError::Validation(format!("{}: validation error", message))
            }
            FaultKind::Timeout => IngestError::Timeout(format!("{}: operation timeout", message)),
            FaultKind::RateLimit => {
                IngestError::RateLimited(format!("{}: rate limit exceeded", message))
            }
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "network" | "network_error" => Ok(FaultKind::Network),
            "database" | "database_error" => Ok(FaultKind::Database),
            "validation" | "validation_error" => Ok(FaultKind::Validation),
            "timeout" => Ok(FaultKind::Timeout),
            "rate_limit" => Ok(FaultKind::RateLimit),
            other => Err(format!("unknown fault kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailureInjectorConfig {
    pub enabled: bool,
    pub probability: f64,
    pub kind: FaultKind,
    /// 1-indexed record counter that always triggers a fault
    pub fail_at_index: Option<usize>,
}

impl Default for FailureInjectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            probability: 0.0,
            kind: FaultKind::Network,
            fail_at_index: None,
        }
    }
}

pub struct FailureInjector {
    config: FailureInjectorConfig,
    rng: Mutex<StdRng>,
}

impl FailureInjector {
    pub fn new(config: FailureInjectorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Seeded variant for reproducible probabilistic runs.
    pub fn with_seed(config: FailureInjectorConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut config: FailureInjectorConfig, rng: StdRng) -> Self {
        config.probability = clamp_probability(config.probability);

        info!(
            enabled = config.enabled,
            probability = config.probability,
            kind = %config.kind,
            fail_at_index = ?config.fail_at_index,
            "Failure injection configured"
        );

        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &FailureInjectorConfig {
        &self.config
    }

    /// Decide whether the check at `record_index` should fault.
    ///
    /// With a target index configured, indexed checks fire only on that index.
    /// Unindexed checks, or checks without a target, fall back to the
    /// configured probability.
    pub fn should_fail(&self, record_index: Option<usize>) -> bool {
        if !self.config.enabled {
            return false;
        }

        if let (Some(target), Some(index)) = (self.config.fail_at_index, record_index) {
            let hit = index == target;
            if hit {
                warn!(
                    record_index = index,
                    kind = %self.config.kind,
                    "Injecting failure at record"
                );
            }
            return hit;
        }

        let hit = self.rng.lock().gen_bool(self.config.probability);
        if hit {
            warn!(
                record_index = ?record_index,
                kind = %self.config.kind,
                "Injecting random failure"
            );
        }
        hit
    }

    /// Build the error for the configured fault kind.
    pub fn fault(&self, message: &str) -> IngestError {
        self.config.kind.to_error(message)
    }

    /// Return the configured fault if the trigger condition holds.
    pub fn check(&self, record_index: Option<usize>, message: &str) -> Result<(), IngestError> {
        if self.should_fail(record_index) {
            return Err(self.fault(message));
        }
        Ok(())
    }
}

fn clamp_probability(probability: f64) -> f64 {
    if probability.is_nan() {
        0.0
    } else {
        probability.clamp(0.0, 1.0)
    }
}
