use crate::Result;
use camino::{Utf8Path, Utf8PathBuf};
use core::time::Duration;
use ohno::{IntoAppError, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// File name looked up in the working directory when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "harvest.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Gitiles host serving repository contents
    pub source_base_url: String,

    /// Code search service endpoint
    pub search_base_url: String,

    /// API key sent with every search request
    pub search_api_key: String,

    /// Referer header sent with search requests
    pub search_referer: String,

    /// Page listing build tags and API levels
    pub build_numbers_url: String,

    /// Package index document
    pub repository_index_url: String,

    /// Base URL that archive names in the package index are relative to
    pub repository_download_url: String,

    /// Open-source project searched
    pub search_project: String,

    /// Repository searched within the project
    pub search_repository: String,

    /// Query used by the `providers` command
    pub provider_query: String,

    /// Ref of the project manifest that maps search results to repositories
    pub manifest_reference: String,

    /// Maximum concurrent requests against one host
    pub max_requests_per_host: usize,

    /// Pause after each fetched document
    #[serde(with = "humantime_serde")]
    pub request_delay: Duration,

    /// Pause between pages of one search
    #[serde(with = "humantime_serde")]
    pub search_page_delay: Duration,

    /// First back-off after being rate limited
    #[serde(with = "humantime_serde")]
    pub rate_limit_cooldown: Duration,

    /// Rate-limited retries per document before giving up; zero retries forever
    pub rate_limit_max_retries: u32,

    /// Search results requested per page
    pub page_size: u32,

    /// Limit on establishing a connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Limit on one attempt of a page-sized request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Limit on one attempt of an archive download
    #[serde(with = "humantime_serde")]
    pub download_timeout: Duration,

    /// Language suffix of the `values-<lang>` resources used for permission labels
    #[serde(default)]
    pub resource_language: Option<String>,
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// Keys missing from the file keep their default values.
    pub fn load(base_dir: &Utf8Path, config_path: Option<&Utf8PathBuf>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading configuration file '{path}'"))?;
            (path.clone(), text)
        } else {
            let path = base_dir.join(CONFIG_FILE_NAME);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // No config file found, use defaults
                    return Ok(Self::default());
                }
                Err(e) => return Err(e).into_app_err_with(|| format!("reading configuration file '{path}'")),
            }
        };

        let config = Self::parse(&text).into_app_err_with(|| format!("parsing configuration file '{final_path}'"))?;
        config.validate()?;

        Ok(config)
    }

    /// Parse `text`, filling unspecified keys from the defaults.
    fn parse(text: &str) -> Result<Self> {
        let mut merged: toml::Table = toml::from_str(DEFAULT_CONFIG_TOML)?;
        let overrides: toml::Table = toml::from_str(text)?;
        for (key, value) in overrides {
            let _ = merged.insert(key, value);
        }
        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Save the default configuration to a TOML file
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// Reject values no run could work with.
    pub fn validate(&self) -> Result<()> {
        let urls = [
            ("source_base_url", &self.source_base_url),
            ("search_base_url", &self.search_base_url),
            ("build_numbers_url", &self.build_numbers_url),
            ("repository_index_url", &self.repository_index_url),
            ("repository_download_url", &self.repository_download_url),
        ];
        for (key, value) in urls {
            if value.trim().is_empty() {
                bail!("{key} must not be empty");
            }
            let _ = url::Url::parse(value).into_app_err_with(|| format!("{key} is not a valid URL: '{value}'"))?;
        }

        if self.max_requests_per_host == 0 {
            bail!("max_requests_per_host must be at least 1");
        }

        if self.page_size == 0 {
            bail!("page_size must be at least 1");
        }

        if self.rate_limit_cooldown.is_zero() {
            bail!("rate_limit_cooldown must be longer than zero");
        }

        let timeouts = [
            ("connect_timeout", self.connect_timeout),
            ("request_timeout", self.request_timeout),
            ("download_timeout", self.download_timeout),
        ];
        for (key, value) in timeouts {
            if value.is_zero() {
                bail!("{key} must be longer than zero");
            }
        }

        if let Some(language) = &self.resource_language
            && (language.is_empty() || !language.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
        {
            bail!("resource_language must look like 'fr' or 'zh-rCN', got '{language}'");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.max_requests_per_host, 10);
        assert_eq!(config.request_delay, Duration::from_secs(1));
        assert_eq!(config.rate_limit_cooldown, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_validate_zero_requests_per_host() {
        let config = Config {
            max_requests_per_host: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_page_size() {
        let config = Config {
            page_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_url() {
        let config = Config {
            source_base_url: " ".to_owned(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_relative_url() {
        let config = Config {
            search_base_url: "grimoire/batch".to_owned(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_cooldown() {
        let config = Config {
            rate_limit_cooldown: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = Config {
            request_timeout: Duration::ZERO,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout"));
    }

    #[test]
    fn test_resource_language_is_optional() {
        assert_eq!(Config::default().resource_language, None);

        let config = Config::parse("resource_language = \"zh-rCN\"\n").unwrap();
        config.validate().unwrap();
        assert_eq!(config.resource_language.as_deref(), Some("zh-rCN"));

        let config = Config::parse("resource_language = \"../en\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse("request_delay = \"250ms\"\nrate_limit_max_retries = 0\n").unwrap();
        assert_eq!(config.request_delay, Duration::from_millis(250));
        assert_eq!(config.rate_limit_max_retries, 0);
        assert_eq!(config.page_size, Config::default().page_size);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = Config::parse("no_such_key = 1\n").unwrap_err();
        assert!(format!("{err:#}").contains("no_such_key"));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_save_default_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let output_path = Utf8PathBuf::try_from(tmp.path().join(CONFIG_FILE_NAME)).unwrap();
        Config::save_default(&output_path).unwrap();
        let loaded = Config::load(&Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap(), Some(&output_path)).unwrap();
        loaded.validate().unwrap();
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_load_missing_config_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let base_dir = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let config = Config::load(&base_dir, None).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_default_config_toml_is_not_empty() {
        assert!(!DEFAULT_CONFIG_TOML.is_empty());
    }
}
