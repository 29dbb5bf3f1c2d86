use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::StartupError;
use crate::fetch::UrlTemplate;
use crate::schema::{EntityKind, Schema};

/// Run settings: defaults, then `zipstat.toml` (optional), then `ZIPSTAT_*` env vars.
/// Command-line flags are applied on top by `main`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    /// Defaults to `data/<kind>-stats.csv`.
    pub csv_path: Option<PathBuf>,
    /// Minimum spacing between two requests.
    pub pace_ms: u64,
    /// Fetches allowed in flight at once.
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Persist each record as soon as it is extracted.
    pub incremental: bool,
    pub zip_url: Option<String>,
    pub county_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/zip_codes_db.sqlite3"),
            csv_path: None,
            pace_ms: 1000,
            concurrency: 1,
            timeout_secs: 30,
            user_agent: "libcurl-agent/1.0".to_string(),
            incremental: false,
            zip_url: None,
            county_url: None,
        }
    }
}

impl Settings {
    pub fn load(file: Option<&Path>) -> Result<Self, StartupError> {
        let file_source = match file {
            Some(path) => File::from(path),
            None => File::with_name("zipstat").required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(file_source)
            .add_source(Environment::with_prefix("ZIPSTAT"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| StartupError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), StartupError> {
        if self.concurrency == 0 {
            return Err(StartupError::Config("concurrency must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(StartupError::Config("timeout_secs must be greater than 0".into()));
        }
        for template in [&self.zip_url, &self.county_url].into_iter().flatten() {
            UrlTemplate::new(template.as_str())?;
        }
        Ok(())
    }

    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn csv_path(&self, kind: EntityKind) -> PathBuf {
        self.csv_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("data/{}-stats.csv", kind)))
    }

    pub fn url_template(&self, kind: EntityKind) -> Result<UrlTemplate, StartupError> {
        let configured = match kind {
            EntityKind::Zip => self.zip_url.as_deref(),
            EntityKind::County => self.county_url.as_deref(),
        };
        UrlTemplate::new(configured.unwrap_or(Schema::for_kind(kind).url_template))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.pace(), Duration::from_secs(1));
        assert_eq!(s.csv_path(EntityKind::Zip), PathBuf::from("data/zip-stats.csv"));
        assert_eq!(
            s.url_template(EntityKind::Zip).unwrap().url_for(&"35004".into()),
            "http://www.city-data.com/zips/35004.html"
        );
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("zipstat.toml");
        std::fs::write(
            &path,
            "pace_ms = 1700\nconcurrency = 4\nzip_url = \"http://localhost/zips/{key}.html\"\n",
        )
        .unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.pace_ms, 1700);
        assert_eq!(s.concurrency, 4);
        assert_eq!(s.timeout_secs, 30);
        assert_eq!(
            s.url_template(EntityKind::Zip).unwrap().url_for(&"87001".into()),
            "http://localhost/zips/87001.html"
        );
    }

    #[test]
    fn rejects_zero_concurrency() {
        let s = Settings {
            concurrency: 0,
            ..Settings::default()
        };
        assert!(matches!(s.validate(), Err(StartupError::Config(_))));
    }

    #[test]
    fn rejects_template_without_placeholder() {
        let s = Settings {
            county_url: Some("https://www.zip-codes.com/county/".into()),
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }
}
