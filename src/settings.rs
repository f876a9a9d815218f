use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                                  (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const MAX_CONCURRENCY: usize = 64;

/// Runtime settings: built-in defaults, then `darwin_scraper.toml` if present,
/// then `DARWIN_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub sitemap_url: String,
    pub site_prefix: String,
    pub backend: String,
    pub snapshot_dir: PathBuf,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub accept_language: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("darwin_scraper").required(false))
            .add_source(Environment::with_prefix("DARWIN").try_parsing(true));
        Self::from_builder(config)
    }

    fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let settings: Settings = builder
            .set_default("db_path", "data/darwin.sqlite")?
            .set_default("sitemap_url", "https://darwin.md/sitemap.xml")?
            .set_default("site_prefix", "https://darwin.md")?
            .set_default("backend", "http")?
            .set_default("snapshot_dir", "snapshots")?
            .set_default("concurrency", 10_i64)?
            .set_default("timeout_secs", 10_i64)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("accept_language", "ro-RO,ro;q=0.8,en-US;q=0.5,en;q=0.3")?
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")?;

        // Reject an unknown backend at start-up rather than mid-run.
        settings.backend()?;
        Ok(Settings {
            concurrency: settings.concurrency.clamp(1, MAX_CONCURRENCY),
            ..settings
        })
    }

    pub fn backend(&self) -> Result<Backend> {
        self.backend.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Http,
    Spider,
    File,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(Backend::Http),
            "spider" => Ok(Backend::Spider),
            "file" | "snapshot" => Ok(Backend::File),
            other => bail!("Unknown backend '{}' (expected http, spider or file)", other),
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_sources() {
        let s = Settings::from_builder(Config::builder()).unwrap();
        assert_eq!(s.db_path, PathBuf::from("data/darwin.sqlite"));
        assert_eq!(s.site_prefix, "https://darwin.md");
        assert_eq!(s.concurrency, 10);
        assert_eq!(s.timeout_secs, 10);
        assert_eq!(s.backend().unwrap(), Backend::Http);
    }

    #[test]
    fn overrides_win_and_concurrency_is_clamped() {
        let builder = Config::builder()
            .set_override("concurrency", 500_i64)
            .unwrap()
            .set_override("backend", "File")
            .unwrap();
        let s = Settings::from_builder(builder).unwrap();
        assert_eq!(s.concurrency, MAX_CONCURRENCY);
        assert_eq!(s.backend().unwrap(), Backend::File);

        let zero = Config::builder().set_override("concurrency", 0_i64).unwrap();
        assert_eq!(Settings::from_builder(zero).unwrap().concurrency, 1);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let builder = Config::builder().set_override("backend", "selenium").unwrap();
        assert!(Settings::from_builder(builder).is_err());
        assert!("playwright".parse::<Backend>().is_err());
        assert_eq!("spider".parse::<Backend>().unwrap(), Backend::Spider);
    }
}
