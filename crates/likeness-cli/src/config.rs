use anyhow::{Context, Result};
use likeness_core::matcher::DEFAULT_SIMILARITY_THRESHOLD;
use likeness_core::session::{SessionConfig, DEFAULT_CONFIDENCE_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration: defaults, then an optional TOML file named by
/// `LIKENESS_CONFIG`, then `LIKENESS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory receiving `<name>.npy` copies of enrolled embeddings.
    pub dataset_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Minimum detector confidence for a face box.
    pub confidence_threshold: f32,
    /// Whether enrolled embeddings are mirrored into `dataset_dir`.
    pub mirror_enabled: bool,
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    dataset_dir: Option<PathBuf>,
    similarity_threshold: Option<f32>,
    confidence_threshold: Option<f32>,
    mirror_enabled: Option<bool>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let file = match std::env::var("LIKENESS_CONFIG") {
            Ok(path) => read_file(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("likeness");

        let db_path = env("LIKENESS_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("faces.db"));

        let dataset_dir = env("LIKENESS_DATASET_DIR")
            .map(PathBuf::from)
            .or(file.dataset_dir)
            .unwrap_or_else(|| {
                db_path
                    .parent()
                    .map(|p| p.join("dataset"))
                    .unwrap_or_else(|| PathBuf::from("dataset"))
            });

        Self {
            db_path,
            dataset_dir,
            similarity_threshold: parsed(&env, "LIKENESS_SIMILARITY_THRESHOLD")
                .or(file.similarity_threshold)
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            confidence_threshold: parsed(&env, "LIKENESS_CONFIDENCE_THRESHOLD")
                .or(file.confidence_threshold)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            mirror_enabled: env("LIKENESS_MIRROR_ENABLED")
                .map(|v| v != "0")
                .or(file.mirror_enabled)
                .unwrap_or(true),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            similarity_threshold: self.similarity_threshold,
            confidence_threshold: self.confidence_threshold,
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn parsed(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<f32> {
    env(key).and_then(|v| v.parse().ok())
}
