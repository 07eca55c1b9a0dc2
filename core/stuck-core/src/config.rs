//! Detection thresholds and their runtime updates.
//!
//! The engine trusts the values it is given: range checks live in
//! [`StuckConfig::validate`] and are applied by whoever owns the settings
//! (the monitor binary, a settings UI) before calling into the engine.

use serde::{Deserialize, Serialize};
use stuck_protocol::SensitivityLevel;

use crate::error::{Result, StuckError};

pub const DEFAULT_NO_OUTPUT_THRESHOLD_SECS: u64 = 30;
pub const DEFAULT_WAITING_INPUT_THRESHOLD_SECS: u64 = 60;
pub const DEFAULT_REPEATED_FAILURE_COUNT: u32 = 3;

pub const MIN_THRESHOLD_SECS: u64 = 10;
pub const MAX_THRESHOLD_SECS: u64 = 600;
pub const MIN_FAILURE_COUNT: u32 = 1;
pub const MAX_FAILURE_COUNT: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StuckConfig {
    pub enabled: bool,
    pub no_output_threshold_seconds: u64,
    pub waiting_input_threshold_seconds: u64,
    pub repeated_failure_count: u32,
    pub sensitivity_level: SensitivityLevel,
    pub excluded_repo_ids: Vec<String>,
    /// Idle trackers older than this are evicted. `None` keeps them forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker_ttl_seconds: Option<u64>,
}

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            no_output_threshold_seconds: DEFAULT_NO_OUTPUT_THRESHOLD_SECS,
            waiting_input_threshold_seconds: DEFAULT_WAITING_INPUT_THRESHOLD_SECS,
            repeated_failure_count: DEFAULT_REPEATED_FAILURE_COUNT,
            sensitivity_level: SensitivityLevel::default(),
            excluded_repo_ids: Vec::new(),
            tracker_ttl_seconds: None,
        }
    }
}

/// Partial configuration; absent fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StuckConfigPatch {
    pub enabled: Option<bool>,
    pub no_output_threshold_seconds: Option<u64>,
    pub waiting_input_threshold_seconds: Option<u64>,
    pub repeated_failure_count: Option<u32>,
    pub sensitivity_level: Option<SensitivityLevel>,
    /// Replaces the whole exclusion list.
    pub excluded_repo_ids: Option<Vec<String>>,
    /// `0` turns eviction off.
    pub tracker_ttl_seconds: Option<u64>,
}

impl StuckConfig {
    pub fn merged(&self, patch: &StuckConfigPatch) -> Self {
        let mut next = self.clone();
        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }
        if let Some(secs) = patch.no_output_threshold_seconds {
            next.no_output_threshold_seconds = secs;
        }
        if let Some(secs) = patch.waiting_input_threshold_seconds {
            next.waiting_input_threshold_seconds = secs;
        }
        if let Some(count) = patch.repeated_failure_count {
            next.repeated_failure_count = count;
        }
        if let Some(level) = patch.sensitivity_level {
            next.sensitivity_level = level;
        }
        if let Some(excluded) = &patch.excluded_repo_ids {
            next.excluded_repo_ids = excluded.clone();
        }
        if let Some(ttl) = patch.tracker_ttl_seconds {
            next.tracker_ttl_seconds = (ttl > 0).then_some(ttl);
        }
        next
    }

    pub fn is_excluded(&self, repository_id: &str) -> bool {
        self.excluded_repo_ids.iter().any(|id| id == repository_id)
    }

    /// Silence allowed for a working session before it counts as `no_output`.
    pub fn effective_no_output_threshold_ms(&self) -> i64 {
        self.scaled_ms(self.no_output_threshold_seconds)
    }

    /// Silence allowed for a waiting session before it counts as `waiting_input`.
    pub fn effective_waiting_input_threshold_ms(&self) -> i64 {
        self.scaled_ms(self.waiting_input_threshold_seconds)
    }

    fn scaled_ms(&self, secs: u64) -> i64 {
        let base_ms = secs.saturating_mul(1000) as f64;
        (base_ms * self.sensitivity_level.multiplier()).round() as i64
    }

    pub fn validate(&self) -> Result<()> {
        check_range(
            "no_output_threshold_seconds",
            self.no_output_threshold_seconds,
            MIN_THRESHOLD_SECS,
            MAX_THRESHOLD_SECS,
        )?;
        check_range(
            "waiting_input_threshold_seconds",
            self.waiting_input_threshold_seconds,
            MIN_THRESHOLD_SECS,
            MAX_THRESHOLD_SECS,
        )?;
        check_range(
            "repeated_failure_count",
            u64::from(self.repeated_failure_count),
            u64::from(MIN_FAILURE_COUNT),
            u64::from(MAX_FAILURE_COUNT),
        )?;
        if self
            .excluded_repo_ids
            .iter()
            .any(|id| id.trim().is_empty())
        {
            return Err(StuckError::ConfigInvalid(
                "excluded_repo_ids must not contain blank ids".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(StuckError::ConfigOutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(StuckConfig::default().validate().is_ok());
    }

    #[test]
    fn sensitivity_scales_time_thresholds_only() {
        let config = StuckConfig {
            no_output_threshold_seconds: 30,
            waiting_input_threshold_seconds: 60,
            sensitivity_level: SensitivityLevel::High,
            ..StuckConfig::default()
        };
        assert_eq!(config.effective_no_output_threshold_ms(), 15_000);
        assert_eq!(config.effective_waiting_input_threshold_ms(), 30_000);
        assert_eq!(config.repeated_failure_count, DEFAULT_REPEATED_FAILURE_COUNT);

        let low = StuckConfig {
            sensitivity_level: SensitivityLevel::Low,
            ..config
        };
        assert_eq!(low.effective_no_output_threshold_ms(), 60_000);
        assert_eq!(low.effective_waiting_input_threshold_ms(), 120_000);
    }

    #[test]
    fn merge_only_touches_present_fields() {
        let base = StuckConfig::default();
        let patch = StuckConfigPatch {
            no_output_threshold_seconds: Some(90),
            excluded_repo_ids: Some(vec!["scratch".to_string()]),
            ..StuckConfigPatch::default()
        };

        let merged = base.merged(&patch);

        assert_eq!(merged.no_output_threshold_seconds, 90);
        assert_eq!(
            merged.waiting_input_threshold_seconds,
            base.waiting_input_threshold_seconds
        );
        assert!(merged.is_excluded("scratch"));
        assert!(!merged.is_excluded("api"));
    }

    #[test]
    fn zero_ttl_disables_eviction() {
        let with_ttl = StuckConfig::default().merged(&StuckConfigPatch {
            tracker_ttl_seconds: Some(3600),
            ..StuckConfigPatch::default()
        });
        assert_eq!(with_ttl.tracker_ttl_seconds, Some(3600));

        let cleared = with_ttl.merged(&StuckConfigPatch {
            tracker_ttl_seconds: Some(0),
            ..StuckConfigPatch::default()
        });
        assert_eq!(cleared.tracker_ttl_seconds, None);
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let too_fast = StuckConfig {
            no_output_threshold_seconds: 5,
            ..StuckConfig::default()
        };
        assert!(matches!(
            too_fast.validate(),
            Err(StuckError::ConfigOutOfRange {
                field: "no_output_threshold_seconds",
                ..
            })
        ));

        let too_many = StuckConfig {
            repeated_failure_count: 11,
            ..StuckConfig::default()
        };
        assert!(too_many.validate().is_err());

        let blank = StuckConfig {
            excluded_repo_ids: vec![" ".to_string()],
            ..StuckConfig::default()
        };
        assert!(matches!(blank.validate(), Err(StuckError::ConfigInvalid(_))));
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let result = serde_json::from_str::<StuckConfigPatch>(r#"{"threshold": 5}"#);
        assert!(result.is_err());
    }
}
