use crate::error::{Error, Result};
use crate::filter::ChangeFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_METADATA_DIR: &str = ".confvault";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Loose,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub root: PathBuf,
    pub retention_ceiling: usize,
    pub ignore: Vec<String>,
    pub sensitive: Vec<String>,
    pub use_default_excludes: bool,
    pub author: String,
    pub backend: StorageBackend,
    #[serde(skip)]
    pub metadata_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            retention_ceiling: 30,
            ignore: Vec::new(),
            sensitive: Vec::new(),
            use_default_excludes: true,
            author: "confvault <confvault@localhost>".to_string(),
            backend: StorageBackend::Loose,
            metadata_dir: DEFAULT_METADATA_DIR.to_string(),
        }
    }
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Read `<root>/.confvault/config.toml` if present, otherwise defaults.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self> {
        Self::load_in(root, DEFAULT_METADATA_DIR)
    }

    pub fn load_in(root: impl Into<PathBuf>, metadata_dir: &str) -> Result<Self> {
        let root = root.into();
        let path = root.join(metadata_dir).join(CONFIG_FILE);
        let mut config = if path.is_file() {
            let text = std::fs::read_to_string(&path)?;
            toml::from_str::<Config>(&text)?
        } else {
            Config::default()
        };
        config.root = root;
        config.metadata_dir = metadata_dir.to_string();
        config.validate()?;
        Ok(config)
    }

    /// Write the file-backed fields to `<root>/<metadata_dir>/config.toml`.
    pub fn save(&self) -> Result<()> {
        let path = self.config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention_ceiling == 0 {
            return Err(Error::Config(
                "retention_ceiling must be at least 1".to_string(),
            ));
        }
        let dir = self.metadata_dir.trim_matches('/');
        if dir.is_empty() || dir.contains('/') || dir == "." || dir == ".." {
            return Err(Error::Config(format!(
                "invalid metadata_dir {:?}",
                self.metadata_dir
            )));
        }
        if self.author.trim().is_empty() {
            return Err(Error::Config("author must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(&self.metadata_dir)
    }

    pub fn config_path(&self) -> PathBuf {
        self.metadata_path().join(CONFIG_FILE)
    }

    pub fn change_filter(&self) -> Result<ChangeFilter> {
        ChangeFilter::new(
            &self.metadata_dir,
            &self.ignore,
            &self.sensitive,
            self.use_default_excludes,
        )
    }

    pub fn with_retention_ceiling(mut self, ceiling: usize) -> Self {
        self.retention_ceiling = ceiling;
        self
    }

    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore = patterns;
        self
    }

    pub fn with_sensitive_patterns(mut self, patterns: Vec<String>) -> Self {
        self.sensitive = patterns;
        self
    }

    pub fn with_default_excludes(mut self, enabled: bool) -> Self {
        self.use_default_excludes = enabled;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_backend(mut self, backend: StorageBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_metadata_dir(mut self, dir: impl Into<String>) -> Self {
        self.metadata_dir = dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
