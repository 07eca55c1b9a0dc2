//! Settings file for the monitor.
//!
//! The engine trusts its configuration, so everything is range-checked here
//! before it gets there. A missing file means defaults.

use std::path::PathBuf;
use stuck_core::{StuckConfig, StuckConfigPatch};

const SETTINGS_DIR: &str = ".stuck-monitor";
const SETTINGS_FILE: &str = "config.toml";

pub fn default_settings_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(SETTINGS_DIR).join(SETTINGS_FILE))
}

/// Loads and validates the settings file as a patch over the defaults.
pub fn load_settings(path: Option<PathBuf>) -> Result<StuckConfigPatch, String> {
    let settings_path = match path {
        Some(path) => path,
        None => default_settings_path()?,
    };

    if !settings_path.exists() {
        tracing::debug!(path = %settings_path.display(), "No settings file; using defaults");
        return Ok(StuckConfigPatch::default());
    }

    let content = fs_err::read_to_string(&settings_path).map_err(|err| {
        format!(
            "Failed to read settings {}: {}",
            settings_path.display(),
            err
        )
    })?;
    let patch = toml::from_str::<StuckConfigPatch>(&content).map_err(|err| {
        format!(
            "Failed to parse settings {}: {}",
            settings_path.display(),
            err
        )
    })?;

    validate_patch(&StuckConfig::default(), &patch)?;
    Ok(patch)
}

pub fn effective_config(path: Option<PathBuf>) -> Result<StuckConfig, String> {
    let patch = load_settings(path)?;
    Ok(StuckConfig::default().merged(&patch))
}

/// Checks that applying `patch` to `current` yields a valid configuration.
pub fn validate_patch(current: &StuckConfig, patch: &StuckConfigPatch) -> Result<(), String> {
    current.merged(patch).validate().map_err(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stuck_protocol::SensitivityLevel;

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");

        let config = effective_config(Some(path)).expect("defaults");
        assert_eq!(config, StuckConfig::default());
    }

    #[test]
    fn parses_partial_settings() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
no_output_threshold_seconds = 45
sensitivity_level = "high"
excluded_repo_ids = ["scratch", "docs"]
"#,
        )
        .expect("write settings");

        let config = effective_config(Some(path)).expect("load settings");
        assert_eq!(config.no_output_threshold_seconds, 45);
        assert_eq!(config.sensitivity_level, SensitivityLevel::High);
        assert_eq!(config.excluded_repo_ids, vec!["scratch", "docs"]);
        assert_eq!(config.waiting_input_threshold_seconds, 60);
        assert!(config.enabled);
    }

    #[test]
    fn rejects_out_of_range_settings() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "repeated_failure_count = 0\n").expect("write settings");

        let err = load_settings(Some(path)).expect_err("out of range");
        assert!(err.contains("repeated_failure_count"), "{}", err);
    }

    #[test]
    fn rejects_unknown_keys() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "no_output_timeout = 30\n").expect("write settings");

        let err = load_settings(Some(path)).expect_err("unknown key");
        assert!(err.starts_with("Failed to parse settings"), "{}", err);
    }
}
