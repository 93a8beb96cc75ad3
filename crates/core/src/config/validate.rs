//! Eager validation of a loaded configuration.

use regex_lite::Regex;

use super::{types::PipelineConfig, ConfigError};

const SUPPORTED_SCHEMES: [&str; 3] = ["file", "s3", "sftp"];

/// Validate a loaded configuration before any handler is constructed.
///
/// Catches the failure modes which would otherwise only surface in the
/// middle of a run: unsupported storage schemes, harvester patterns that do
/// not compile, and executor templates missing the staging-tree slot.
pub fn validate_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    validate_storage_url("global.archive_url", &config.global.archive_url)?;
    validate_storage_url("global.upload_url", &config.global.upload_url)?;

    if config.global.pipeline_name.is_empty() {
        return Err(ConfigError::ValidationError(
            "global.pipeline_name must not be empty".to_string(),
        ));
    }

    for harvester in &config.harvesters {
        if !harvester.exec.contains("{base}") {
            return Err(ConfigError::ValidationError(format!(
                "harvester '{}' exec template must contain '{{base}}'",
                harvester.name
            )));
        }
        for event in &harvester.events {
            if event.regexes.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "harvester '{}' has an event with no regexes",
                    harvester.name
                )));
            }
            for pattern in &event.regexes {
                Regex::new(pattern).map_err(|e| {
                    ConfigError::ValidationError(format!(
                        "harvester '{}' pattern '{}' does not compile: {}",
                        harvester.name, pattern, e
                    ))
                })?;
            }
        }
    }

    Ok(())
}

fn validate_storage_url(key: &str, url: &str) -> Result<(), ConfigError> {
    let scheme = url.split("://").next().unwrap_or_default();
    if url.contains("://") && SUPPORTED_SCHEMES.contains(&scheme) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{}: unsupported storage URL '{}'",
            key, url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn base_config() -> PipelineConfig {
        load_config_from_str(
            r#"
[global]
pipeline_name = "moorings"
archive_url = "file:///var/archive"
upload_url = "s3://bucket/prefix"
wip_dir = "/var/incoming"
"#,
        )
        .unwrap()
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn unsupported_scheme_fails() {
        let mut config = base_config();
        config.global.upload_url = "ftp://host/prefix".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn exec_template_must_reference_base() {
        let mut config = base_config();
        config.harvesters = vec![crate::config::HarvesterConfig {
            name: "h1".to_string(),
            exec: "harvest.sh".to_string(),
            events: vec![],
        }];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn bad_event_regex_fails() {
        let mut config = base_config();
        config.harvesters = vec![crate::config::HarvesterConfig {
            name: "h1".to_string(),
            exec: "harvest.sh {base}".to_string(),
            events: vec![crate::config::HarvesterEvent {
                regexes: vec!["([unclosed".to_string()],
                extra_params: None,
            }],
        }];
        assert!(validate_config(&config).is_err());
    }
}
