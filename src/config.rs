use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScanConfig {
    /// Clip root. Optional here because `clipcat scan <ROOT>` can supply it.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_write_retries: default_max_write_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_max_write_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    50
}

impl ScanConfig {
    pub fn exclude_set(&self) -> Result<GlobSet> {
        build_globset(&self.exclude_globs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    if config.sync.max_write_retries > 10 {
        anyhow::bail!("sync.max_write_retries must be <= 10");
    }

    if config.sync.retry_backoff_ms > 10_000 {
        anyhow::bail!("sync.retry_backoff_ms must be <= 10000");
    }

    config
        .scan
        .exclude_set()
        .with_context(|| "Invalid pattern in scan.exclude_globs")?;

    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("clipcat.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[db]\npath = \"./data/clips.sqlite\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.db.path, PathBuf::from("./data/clips.sqlite"));
        assert!(cfg.scan.root.is_none());
        assert!(!cfg.scan.follow_symlinks);
        assert_eq!(cfg.sync.max_write_retries, 3);
        assert_eq!(cfg.sync.retry_backoff_ms, 50);
    }

    #[test]
    fn full_config_parses() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            r#"
[db]
path = "/tmp/clips.sqlite"

[scan]
root = "/srv/clips"
follow_symlinks = true
exclude_globs = ["**/.trash/**"]

[sync]
max_write_retries = 1
retry_backoff_ms = 5
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.scan.root, Some(PathBuf::from("/srv/clips")));
        assert!(cfg.scan.follow_symlinks);
        assert!(cfg.scan.exclude_set().unwrap().is_match(".trash/x/a.mp3"));
        assert_eq!(cfg.sync.max_write_retries, 1);
    }

    #[test]
    fn rejects_excessive_retries() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "[db]\npath = \"x.sqlite\"\n[sync]\nmax_write_retries = 50\n",
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_write_retries"));
    }

    #[test]
    fn rejects_bad_glob() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "[db]\npath = \"x.sqlite\"\n[scan]\nexclude_globs = [\"a[\"]\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn missing_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(&tmp.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
