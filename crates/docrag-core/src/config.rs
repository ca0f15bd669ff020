//! Lightweight configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`__` separates nested keys, e.g. `APP_RETRIEVAL__TOP_K=8`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::chunker::ChunkingConfig;
use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    /// Loads `path` plus its `<stem>.<env>.toml` sibling, then `APP_*` overrides.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let sibling = |suffix: &str| {
            let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| "config".into());
            path.with_file_name(format!("{stem}.{suffix}.toml"))
        };

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file(path));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(sibling("dev"))),
            "prod" | "production" => figment = figment.merge(Toml::file(sibling("prod"))),
            "test" | "testing" => figment = figment.merge(Toml::file(sibling("test"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    /// Builds a config from inline TOML layered over the defaults (no files, no env).
    pub fn from_toml_str(toml: &str) -> Self {
        let figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::string(toml));
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self.figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        if matches!(env, "prod" | "production") {
            let backend: String = self.get("embedding.backend")?;
            if backend == "hashed" {
                tracing::warn!("production config uses the hashed embedder; results will not be semantic");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingSettings,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
    pub ingest: IngestSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if self.embedding.batch_size == 0 {
            return Err(Error::InvalidConfig("embedding.batch_size must be at least 1".into()));
        }
        if self.embedding.max_concurrency == 0 || self.ingest.max_concurrency == 0 {
            return Err(Error::InvalidConfig("max_concurrency must be at least 1".into()));
        }
        if self.embedding.dim == Some(0) {
            return Err(Error::InvalidConfig("embedding.dim must be positive".into()));
        }
        if self.retrieval.top_k == 0 || self.retrieval.over_fetch == 0 {
            return Err(Error::InvalidConfig("retrieval.top_k and retrieval.over_fetch must be at least 1".into()));
        }
        if self.retrieval.dedup_score_delta < 0.0 {
            return Err(Error::InvalidConfig("retrieval.dedup_score_delta must not be negative".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Lance,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub data_dir: String,
    pub entries_table: String,
    pub documents_table: String,
    pub chunks_table: String,
    pub cache_table: String,
    /// Tantivy directory for the keyword fallback; defaults to `<data_dir>/keyword`.
    pub keyword_dir: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Lance,
            data_dir: "./data".into(),
            entries_table: "entries".into(),
            documents_table: "documents".into(),
            chunks_table: "chunks".into(),
            cache_table: "embedding_cache".into(),
            keyword_dir: None,
        }
    }
}

impl StorageSettings {
    pub fn data_path(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }

    pub fn keyword_path(&self) -> PathBuf {
        match &self.keyword_dir {
            Some(dir) => resolve_with_base(&self.data_path(), dir),
            None => self.data_path().join("keyword"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackendKind {
    Hashed,
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackendKind,
    /// Expected dimension; pinned from the first response when unset.
    pub dim: Option<usize>,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub model_dir: Option<String>,
    pub max_tokens: usize,
    pub remote: RemoteEmbeddingSettings,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::Hashed,
            dim: None,
            batch_size: 50,
            max_concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 200,
            model_dir: None,
            max_tokens: 256,
            remote: RemoteEmbeddingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteEmbeddingSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for RemoteEmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/embeddings".into(),
            model: "text-embedding-3-small".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Full scan with in-process cosine; exact ranking.
    Exact,
    /// ANN candidates re-scored with exact cosine; approximate recall.
    Approximate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub mode: SearchMode,
    pub nprobes: usize,
    pub refine_factor: u32,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { mode: SearchMode::Exact, nprobes: 20, refine_factor: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub over_fetch: usize,
    pub dedup: bool,
    pub dedup_score_delta: f32,
    pub min_score: Option<f32>,
    /// Answer from the keyword index when the embedding service is down.
    pub keyword_fallback: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 5, over_fetch: 3, dedup: true, dedup_score_delta: 0.05, min_score: None, keyword_fallback: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub max_concurrency: usize,
    pub extensions: Vec<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self { max_concurrency: 2, extensions: vec!["txt".into(), "md".into()] }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
