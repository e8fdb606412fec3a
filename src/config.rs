use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Runtime settings: defaults, then `esaj.toml` if present, then `ESAJ_*` env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub data_dir: PathBuf,
    pub db_file: String,
    pub download_delay_ms: u64,
    pub pdf_download_delay_ms: u64,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Stop a listing traversal after this many pages (0 = no limit).
    pub max_pages: u32,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: "https://esaj.tjsp.jus.br".to_string(),
            data_dir: PathBuf::from("data"),
            db_file: "esaj.sqlite".to_string(),
            download_delay_ms: 3000,
            pdf_download_delay_ms: 3000,
            max_retries: 3,
            timeout_secs: 300,
            max_pages: 0,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Config::builder()
            .add_source(File::with_name("esaj").required(false))
            .add_source(Environment::with_prefix("ESAJ").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .context("Failed to load settings")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }

    /// Root of the per-family PDF directories.
    pub fn pdf_root(&self) -> PathBuf {
        self.data_dir.join("pdf")
    }

    pub fn download_delay(&self) -> Duration {
        Duration::from_millis(self.download_delay_ms)
    }

    pub fn pdf_download_delay(&self) -> Duration {
        Duration::from_millis(self.pdf_download_delay_ms)
    }

    pub fn max_pages(&self) -> Option<u32> {
        (self.max_pages > 0).then_some(self.max_pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_tjsp() {
        let s = Settings::default();
        assert_eq!(s.base_url, "https://esaj.tjsp.jus.br");
        assert_eq!(s.db_path(), PathBuf::from("data").join("esaj.sqlite"));
        assert_eq!(s.pdf_root(), PathBuf::from("data/pdf"));
        assert_eq!(s.max_pages(), None);
    }

    #[test]
    fn max_pages_zero_means_unlimited() {
        let s = Settings {
            max_pages: 4,
            ..Settings::default()
        };
        assert_eq!(s.max_pages(), Some(4));
    }
}
