//! Settings for textual pipelines and the command line driver.
//!
//! Settings are read from a TOML file. Every field is optional and falls back
//! to its default, so an empty file is valid.
//!
//! ```toml
//! capacity = 128
//! concurrency = 4
//! http_timeout_secs = 10
//! hidden = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::{DEFAULT_CAPACITY, ReadConfig};
use crate::error::{PipelineError, Result};
use crate::net::{HttpConfig, MAX_REDIRECTS};
use crate::operators::parallel::default_concurrency;
use crate::scan::ScanConfig;

/// Knobs shared by every stage of a textual pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Bound of every stream bridge channel.
    pub capacity: usize,
    /// In-flight bound for `parallel`. Unset means available parallelism minus one.
    pub concurrency: Option<usize>,
    /// HTTP timeout in seconds, `0` for none.
    pub http_timeout_secs: u64,
    /// Redirect hop limit for HTTP requests.
    pub redirects: usize,
    /// Whether directory scans include dot-entries.
    pub hidden: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            concurrency: None,
            http_timeout_secs: 30,
            redirects: MAX_REDIRECTS,
            hidden: false,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let settings = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), ?settings, "loaded settings");
        Ok(settings)
    }

    /// Parse settings from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PipelineError::Config("capacity must be >= 1".to_string()));
        }
        if self.concurrency == Some(0) {
            return Err(PipelineError::Config("concurrency must be >= 1".to_string()));
        }
        Ok(())
    }

    /// The effective `parallel` bound.
    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or_else(default_concurrency)
    }

    pub fn read_config(&self) -> ReadConfig {
        ReadConfig::default().capacity(self.capacity)
    }

    pub fn http_config(&self) -> HttpConfig {
        let timeout = (self.http_timeout_secs > 0).then(|| Duration::from_secs(self.http_timeout_secs));
        HttpConfig {
            timeout,
            redirects: self.redirects,
            output: self.read_config(),
            ..HttpConfig::default()
        }
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig::default().hidden(self.hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_defaults() {
        assert_eq!(Settings::parse("").unwrap(), Settings::default());
    }

    #[test]
    fn test_partial_override() {
        let settings = Settings::parse("concurrency = 3\nhidden = true\n").unwrap();
        assert_eq!(settings.concurrency(), 3);
        assert!(settings.hidden);
        assert_eq!(settings.capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let settings = Settings::parse("http_timeout_secs = 0").unwrap();
        assert_eq!(settings.http_config().timeout, None);
        assert_eq!(
            Settings::default().http_config().timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(Settings::parse("capacity = 0"), Err(PipelineError::Config(_))));
        assert!(matches!(Settings::parse("concurrency = 0"), Err(PipelineError::Config(_))));
        assert!(matches!(Settings::parse("capacity = \"many\""), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "capacity = 8\n").unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.read_config().capacity, 8);
        assert!(Settings::load(file.path().with_extension("missing")).is_err());
    }
}
