use serde::Deserialize;
use std::fs;
use std::io::{Error, ErrorKind};
use std::path::PathBuf;
use std::time::Duration;

use crate::chunker::DayBoundary;
use crate::fetcher::FetchConfig;
use crate::query::SeriesNames;

pub const PROMETHEUS_URL_ENV: &str = "PROMETHEUS_URL";

/// A named set of targets reported together.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct GroupConfig {
    pub name: String,
    pub targets: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Settings {
    pub prometheus_url: String,
    pub listen_address: String,
    pub metrics_address: String,
    pub request_timeout_secs: u64,
    pub chunk_timeout_secs: u64,
    pub operation_timeout_secs: Option<u64>,
    pub step_secs: u64,
    pub max_concurrent_requests: usize,
    /// `local`, `utc` or a fixed offset like `+05:30`
    pub day_boundary: String,
    pub success_series: String,
    pub duration_series: String,
    pub instance_label: String,
    pub groups: Vec<GroupConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        let names = SeriesNames::default();
        Settings {
            prometheus_url: "http://localhost:9090".to_string(),
            listen_address: "0.0.0.0:3000".to_string(),
            metrics_address: "0.0.0.0:3001".to_string(),
            request_timeout_secs: 30,
            chunk_timeout_secs: 60,
            operation_timeout_secs: None,
            step_secs: 60,
            max_concurrent_requests: 8,
            day_boundary: "local".to_string(),
            success_series: names.success,
            duration_series: names.duration,
            instance_label: names.instance_label,
            groups: vec![],
        }
    }
}

impl Settings {
    pub fn load(path: &PathBuf) -> Result<Settings, Error> {
        if !path.exists() {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("Settings file not found: {}", path.display()),
            ));
        }

        let config_file_contents = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("Failed to read settings file: {}", e),
                ));
            }
        };

        Settings::from_str(config_file_contents.as_str())
    }

    pub fn from_str(content: &str) -> Result<Settings, Error> {
        let settings: Settings = match toml::from_str(content) {
            Ok(settings) => settings,
            Err(e) => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("Failed to parse settings: {}", e),
                ))
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Overrides the backend URL from `PROMETHEUS_URL` when it is set.
    pub fn with_env_overrides(mut self) -> Settings {
        if let Ok(url) = std::env::var(PROMETHEUS_URL_ENV) {
            if !url.trim().is_empty() {
                self.prometheus_url = url;
            }
        }
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if self.prometheus_url.trim().is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "prometheus_url must not be empty",
            ));
        }
        if self.step_secs == 0 || self.chunk_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "step and timeouts must be at least one second",
            ));
        }
        if let Err(e) = DayBoundary::parse(&self.day_boundary) {
            return Err(Error::new(ErrorKind::InvalidData, e.to_string()));
        }
        Ok(())
    }

    pub fn series_names(&self) -> SeriesNames {
        SeriesNames {
            success: self.success_series.clone(),
            duration: self.duration_series.clone(),
            instance_label: self.instance_label.clone(),
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            step: Duration::from_secs(self.step_secs),
            chunk_timeout: Duration::from_secs(self.chunk_timeout_secs),
            max_concurrent_requests: self.max_concurrent_requests.max(1),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_settings_from_str_valid() {
        let toml_content = r#"
prometheus_url = "http://prometheus:9090"
chunk_timeout_secs = 90
operation_timeout_secs = 300
day_boundary = "+05:30"

[[groups]]
name = "Example"
targets = ["https://example.com", "https://api.example.com"]

[[groups]]
name = "Google"
targets = ["https://google.com"]
"#;

        let settings = Settings::from_str(toml_content).expect("Failed to parse valid TOML");

        assert_eq!(settings.prometheus_url, "http://prometheus:9090");
        assert_eq!(settings.fetch_config().chunk_timeout, Duration::from_secs(90));
        assert_eq!(settings.operation_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(settings.groups.len(), 2);
        assert_eq!(settings.groups[0].name, "Example");
        assert_eq!(settings.groups[0].targets.len(), 2);
        assert_eq!(settings.groups[1].targets, vec!["https://google.com"]);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_str("").expect("Failed to parse empty settings");

        assert_eq!(settings.prometheus_url, "http://localhost:9090");
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
        assert_eq!(settings.fetch_config().step, Duration::from_secs(60));
        assert_eq!(settings.fetch_config().chunk_timeout, Duration::from_secs(60));
        assert_eq!(settings.operation_timeout(), None);
        assert_eq!(settings.series_names(), SeriesNames::default());
        assert!(settings.groups.is_empty());
    }

    #[test]
    fn test_settings_from_str_invalid() {
        let invalid_toml = r#"
[[groups]]
name = "Missing targets"
"#;

        let result = Settings::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_rejects_bad_day_boundary() {
        let result = Settings::from_str(r#"day_boundary = "yesterday""#);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_settings_rejects_zero_step() {
        assert!(Settings::from_str("step_secs = 0").is_err());
    }

    #[test]
    fn test_settings_load_file_exists() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let toml_content = r#"
prometheus_url = "http://metrics.internal:9090"
max_concurrent_requests = 4
"#;

        temp_file
            .write_all(toml_content.as_bytes())
            .expect("Failed to write to temp file");
        let temp_path = temp_file.path().to_path_buf();

        let settings = Settings::load(&temp_path).expect("Failed to load settings from file");

        assert_eq!(settings.prometheus_url, "http://metrics.internal:9090");
        assert_eq!(settings.fetch_config().max_concurrent_requests, 4);
    }

    #[test]
    fn test_settings_load_file_not_found() {
        let non_existent_path = PathBuf::from("/path/that/does/not/exist/settings.toml");
        let result = Settings::load(&non_existent_path);

        assert!(result.is_err());
        let error = result.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_settings_load_invalid_file_content() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let invalid_content = "this is not valid TOML content";

        temp_file
            .write_all(invalid_content.as_bytes())
            .expect("Failed to write to temp file");
        let temp_path = temp_file.path().to_path_buf();

        let result = Settings::load(&temp_path);

        assert!(result.is_err());
        let error = result.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidData);
    }
}
