use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "lab-bundle";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "LAB_BUNDLE_CONFIG";

/// Token in OCR tool arguments replaced by the document path.
pub const DOCUMENT_PLACEHOLDER: &str = "{document}";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "lab_bundle=info,warn"
}

/// Per-user config directory, e.g. `~/.config/lab-bundle/` on Linux.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME))
}

pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.json"))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One external tool: the executable, its arguments and run limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub program: String,
    pub args: Vec<String>,
    /// `None` waits for the tool indefinitely. Setting a bound is recommended.
    pub timeout_secs: Option<u64>,
    pub merge_stderr: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "python3".into(),
            args: Vec::new(),
            timeout_secs: None,
            merge_stderr: false,
        }
    }
}

impl ToolConfig {
    fn ocr_default() -> Self {
        Self {
            args: vec!["OCR.py".into(), DOCUMENT_PLACEHOLDER.into()],
            merge_stderr: true,
            ..Self::default()
        }
    }

    fn llm_default() -> Self {
        Self {
            args: vec!["GPT4FREE.py".into()],
            ..Self::default()
        }
    }

    pub fn uses_document(&self) -> bool {
        self.args.iter().any(|arg| arg.contains(DOCUMENT_PLACEHOLDER))
    }

    /// Arguments with every `{document}` token replaced by `document`.
    pub fn args_for(&self, document: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(DOCUMENT_PLACEHOLDER, document))
            .collect()
    }
}

/// Optional files replacing the built-in prompt text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub instructions_path: Option<PathBuf>,
    pub schema_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scanned report handed to the OCR tool.
    pub document_path: Option<PathBuf>,
    pub ocr: ToolConfig,
    pub llm: ToolConfig,
    pub prompt: PromptConfig,
    /// When set, every run writes its intermediate artifacts here.
    pub dump_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            document_path: None,
            ocr: ToolConfig::ocr_default(),
            llm: ToolConfig::llm_default(),
            prompt: PromptConfig::default(),
            dump_dir: None,
        }
    }
}

impl AppConfig {
    /// Built-in defaults, then the config file, then environment overrides.
    ///
    /// The file is `explicit` if given, else `$LAB_BUNDLE_CONFIG`, else the
    /// per-user config file when it exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| default_config_path().filter(|p| p.is_file()));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Config file loaded");
        Ok(config)
    }

    /// Apply `LAB_BUNDLE_*` overrides read through `lookup`. Empty values
    /// are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(program) = get("LAB_BUNDLE_OCR_PROGRAM") {
            self.ocr.program = program;
        }
        if let Some(program) = get("LAB_BUNDLE_LLM_PROGRAM") {
            self.llm.program = program;
        }
        if let Some(document) = get("LAB_BUNDLE_DOCUMENT") {
            self.document_path = Some(PathBuf::from(document));
        }
        if let Some(dir) = get("LAB_BUNDLE_DUMP_DIR") {
            self.dump_dir = Some(PathBuf::from(dir));
        }
    }
}
