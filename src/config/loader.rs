//! Configuration loading.
//!
//! Reads a TOML file, substitutes `${ENV_VAR}` placeholders from the process
//! environment, deserializes, and validates.

use std::path::Path;

use validator::Validate;

use super::{ConductorConfig, ConfigurationError};

/// Environment variable naming the config file when no CLI argument is given
pub const CONFIG_PATH_ENV: &str = "CONDUCTOR_CONFIG_PATH";

/// Fallback config path relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/conductor.toml";

impl ConductorConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let contents = substitute_env_vars(&contents);

        let config: ConductorConfig =
            toml::from_str(&contents).map_err(|e| ConfigurationError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        config
            .validate()
            .map_err(|e| ConfigurationError::invalid(e.to_string()))?;

        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load from `CONDUCTOR_CONFIG_PATH`, falling back to
    /// [`DEFAULT_CONFIG_PATH`].
    pub fn load_from_env() -> Result<Self, ConfigurationError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path)
    }
}

/// Substitute environment variables in configuration content.
///
/// Replaces `${VAR_NAME}` patterns with environment variable values. Unset
/// variables leave the placeholder in place so validation reports them.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = result[start + 2..start + end].to_string();
            if let Ok(var_value) = std::env::var(&var_name) {
                let pattern = format!("${{{var_name}}}");
                result = result.replace(&pattern, &var_value);
            } else {
                tracing::warn!(
                    variable = %var_name,
                    "environment variable not found, leaving placeholder"
                );
                break;
            }
        } else {
            break;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL_CONFIG: &str = r#"
[store]
path = "conductor.db"

[paths]
local_case_root = "/var/lib/conductor/cases"
remote_upload_root = "/data/cases"
remote_download_root = "/data/results"

[[workflow.steps]]
name = "upload_case_files"
type = "upload"
progress = 50

[[workflow.steps]]
name = "run_sim"
type = "execute"
progress = 100

[commands]
run_sim = "run --case {case_id} --gpu {gpu_id}"
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let file = write_config(MINIMAL_CONFIG);
        let config = ConductorConfig::load(file.path()).expect("load");

        assert_eq!(config.queues.inbox, "conductor_queue");
        assert_eq!(config.broker.prefetch_count, 8);
        assert_eq!(config.broker.max_retry_count, 5);
        assert_eq!(config.resources.gpu_count, 0);
        assert_eq!(config.workflow.steps.len(), 2);
        assert_eq!(config.commands["run_sim"], "run --case {case_id} --gpu {gpu_id}");
    }

    #[test]
    fn test_load_missing_file() {
        let err = ConductorConfig::load("/nonexistent/conductor.toml").unwrap_err();
        assert!(matches!(err, ConfigurationError::Io { .. }));
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let file = write_config("not [valid toml");
        let err = ConductorConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse { .. }));
    }

    #[test]
    fn test_load_rejects_out_of_range_progress() {
        let bad = MINIMAL_CONFIG.replace("progress = 50", "progress = 250");
        let file = write_config(&bad);
        let err = ConductorConfig::load(file.path()).unwrap_err();
        // 250 overflows u8 at parse time
        assert!(matches!(err, ConfigurationError::Parse { .. }));
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("CONDUCTOR_TEST_DB_PATH", "/tmp/conductor-test.db");
        let templated = MINIMAL_CONFIG.replace("conductor.db", "${CONDUCTOR_TEST_DB_PATH}");
        let file = write_config(&templated);
        let config = ConductorConfig::load(file.path()).expect("load");
        assert_eq!(config.store.path, "/tmp/conductor-test.db");
    }

    #[test]
    fn test_unset_env_var_leaves_placeholder() {
        let substituted = substitute_env_vars("path = \"${CONDUCTOR_UNSET_VAR_XYZ}\"");
        assert!(substituted.contains("${CONDUCTOR_UNSET_VAR_XYZ}"));
    }
}
