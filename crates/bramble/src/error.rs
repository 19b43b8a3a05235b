use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrambleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {action} {path}: {source}")]
    IoAt {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error in {path}: {message}")]
    TomlParse { path: PathBuf, message: String },

    #[error("YAML parse error in {path}: {message}")]
    YamlParse { path: PathBuf, message: String },

    #[error("JSON parse error in {path}: {message}")]
    JsonParse { path: PathBuf, message: String },

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Invalid frontmatter in file: {path}")]
    InvalidFrontmatter { path: PathBuf },

    #[error("Config file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Path {path} escapes base directory {base}")]
    PathEscape { path: PathBuf, base: PathBuf },

    #[error("Permalink '{permalink}' of {path} is not a safe output path")]
    InvalidPermalink { path: PathBuf, permalink: String },

    #[error("Layout cycle detected at '{name}' while rendering {path}")]
    LayoutCycle { name: String, path: PathBuf },

    #[error("Render error in {path}: {message}")]
    Render { path: PathBuf, message: String },

    #[error("Build failed during {stage}: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<BrambleError>,
    },
}

impl BrambleError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Name of the failed build stage, if this error came out of one.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BrambleError>;

/// Attaches the action and path to a bare `io::Error`.
pub trait IoContext<T> {
    fn io_context(self, action: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, action: &'static str, path: &Path) -> Result<T> {
        self.map_err(|source| BrambleError::IoAt {
            action,
            path: path.to_path_buf(),
            source,
        })
    }
}
