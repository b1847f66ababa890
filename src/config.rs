//! Configuration management for scansplit using the prefer crate.
//!
//! A config file is discovered by prefer (or given explicitly), parsed with
//! serde according to its extension, then resolved into [`Settings`] with
//! paths made absolute and environment overrides applied.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default database filename inside the data directory.
const DEFAULT_DATABASE_FILENAME: &str = "scansplit.db";
/// Default subdirectory for extracted group PDFs.
const OUTPUTS_SUBDIR: &str = "outputs";
/// Default subdirectory for rasterized pages and other scratch files.
const WORK_SUBDIR: &str = "work";

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid label pattern '{name}': {source}")]
    InvalidPattern { name: String, source: regex::Error },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Page rasterization backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterBackend {
    /// Poppler's pdftoppm.
    #[default]
    Pdftoppm,
    /// Ghostscript (`gs`).
    Ghostscript,
}

/// Page subsetting engine used by the PDF extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsetEngine {
    Qpdf,
    Pdftk,
    /// In-process subsetting with lopdf (no external binary).
    Lopdf,
}

impl SubsetEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubsetEngine::Qpdf => "qpdf",
            SubsetEngine::Pdftk => "pdftk",
            SubsetEngine::Lopdf => "lopdf",
        }
    }
}

impl std::fmt::Display for SubsetEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Writing systems whose letters are kept in derived labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Script {
    Latin,
    Cyrillic,
    Greek,
}

impl Script {
    /// Whether `c` is a letter of this script.
    pub fn contains(&self, c: char) -> bool {
        match self {
            Script::Latin => {
                c.is_ascii_alphabetic() || (c.is_alphabetic() && ('\u{00C0}'..='\u{024F}').contains(&c))
            }
            Script::Cyrillic => c.is_alphabetic() && ('\u{0400}'..='\u{052F}').contains(&c),
            Script::Greek => c.is_alphabetic() && ('\u{0370}'..='\u{03FF}').contains(&c),
        }
    }
}

/// A named regex whose first capture group becomes a segment label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPattern {
    pub name: String,
    pub regex: String,
}

impl LabelPattern {
    fn new(name: &str, regex: &str) -> Self {
        Self {
            name: name.to_string(),
            regex: regex.to_string(),
        }
    }
}

/// Default label patterns, in precedence order.
///
/// Keywords match whole words only and a labeled value must contain a digit.
pub fn default_label_patterns() -> Vec<LabelPattern> {
    vec![
        LabelPattern::new(
            "voucher",
            r"(?i)\b(?:voucher|квитанция|ваучер)\b\s*(?:no\.?|nr\.?|#|№)?\s*[:\-]?\s*([0-9A-Za-zА-Яа-яЁё\-/]*\d[0-9A-Za-zА-Яа-яЁё\-/]*)",
        ),
        LabelPattern::new(
            "ledger_entry",
            r"(?i)\b(?:ledger\s+entry|journal\s+entry|проводка|бухгалтерская\s+справка)\b\s*(?:no\.?|nr\.?|#|№)?\s*[:\-]?\s*([0-9A-Za-zА-Яа-яЁё\-/]*\d[0-9A-Za-zА-Яа-яЁё\-/]*)",
        ),
        LabelPattern::new(
            "invoice",
            r"(?i)\b(?:invoice|счет-фактура|счёт-фактура|счет|счёт|накладная)\b\s*(?:no\.?|nr\.?|#|№)?\s*[:\-]?\s*([0-9A-Za-zА-Яа-яЁё\-/]*\d[0-9A-Za-zА-Яа-яЁё\-/]*)",
        ),
        LabelPattern::new("iso_date", r"\b(\d{4}-\d{2}-\d{2})\b"),
        LabelPattern::new("slash_date", r"\b(\d{1,2}/\d{1,2}/\d{2,4})\b"),
    ]
}

/// Barcode recognition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Rasterization resolution.
    pub dpi: u32,
    /// Rasterization backend.
    pub rasterizer: RasterBackend,
    /// Worker threads for page-level barcode scanning (1 = sequential).
    pub workers: usize,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            rasterizer: RasterBackend::default(),
            workers: 4,
        }
    }
}

/// OCR settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Tesseract language(s), e.g. "rus+eng".
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "rus+eng".to_string(),
        }
    }
}

/// Segment naming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// Direct text shorter than this falls back to OCR.
    pub min_direct_text_chars: usize,
    /// Scripts whose letters survive label sanitization.
    pub scripts: Vec<Script>,
    /// Group code used when the first page carries no barcode.
    pub no_separator_code: String,
    /// Ordered label patterns; the first match wins.
    pub patterns: Vec<LabelPattern>,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            min_direct_text_chars: 40,
            scripts: vec![Script::Latin, Script::Cyrillic],
            no_separator_code: "NO_SEPARATOR".to_string(),
            patterns: default_label_patterns(),
        }
    }
}

/// PDF page extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub primary: SubsetEngine,
    pub secondary: SubsetEngine,
    /// Outputs smaller than this are treated as failed.
    pub min_output_bytes: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            primary: SubsetEngine::Qpdf,
            secondary: SubsetEngine::Lopdf,
            min_output_bytes: 1024,
        }
    }
}

/// External tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Per-invocation timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Processing lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Seconds after which an abandoned lock expires.
    pub ttl_secs: u64,
    /// Lock backend URL (None = local database, "redis://..." = Redis).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            backend: None,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory (relative paths resolve against the config file).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename or path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Output directory for extracted groups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    /// Scratch directory for rasterized pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    pub recognition: RecognitionConfig,
    pub ocr: OcrConfig,
    pub naming: NamingConfig,
    pub extraction: ExtractionConfig,
    pub tools: ToolsConfig,
    pub lock: LockConfig,
    /// Path the config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Falls back to defaults when no config file is found.
    pub async fn load() -> Result<Self, ConfigError> {
        match prefer::load("scansplit").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await,
                None => Ok(Self::default()),
            },
            Err(_) => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_err = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| parse_err(e.to_string())),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| parse_err(e.to_string())),
            _ => serde_json::from_str(contents).map_err(|e| parse_err(e.to_string())),
        }
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Apply `SCANSPLIT_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("SCANSPLIT_DATA_DIR") {
            self.data_dir = Some(dir);
        }
        if let Ok(lang) = std::env::var("SCANSPLIT_OCR_LANGUAGE") {
            self.ocr.language = lang;
        }
        if let Ok(backend) = std::env::var("SCANSPLIT_LOCK_BACKEND") {
            self.lock.backend = Some(backend);
        }
        self
    }
}

/// Resolve a path that may be relative to the config file.
/// - Absolute paths are returned as-is
/// - Paths starting with ~ are expanded
/// - Relative paths are resolved relative to `base_dir`
pub fn resolve_path(path_str: &str, base_dir: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(path_str);
    let path = Path::new(expanded.as_ref());

    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Resolved application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    pub recognition: RecognitionConfig,
    pub ocr: OcrConfig,
    pub naming: NamingConfig,
    pub extraction: ExtractionConfig,
    pub tools: ToolsConfig,
    pub lock: LockConfig,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scansplit");
        Self::with_data_dir(data_dir)
    }
}

impl Settings {
    /// Create settings with a custom data directory and default everything else.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join(DEFAULT_DATABASE_FILENAME),
            output_dir: data_dir.join(OUTPUTS_SUBDIR),
            work_dir: data_dir.join(WORK_SUBDIR),
            data_dir,
            recognition: RecognitionConfig::default(),
            ocr: OcrConfig::default(),
            naming: NamingConfig::default(),
            extraction: ExtractionConfig::default(),
            tools: ToolsConfig::default(),
            lock: LockConfig::default(),
        }
    }

    /// Build settings from a loaded config, resolving paths against `base_dir`.
    pub fn from_config(config: &Config, base_dir: &Path) -> Result<Self, ConfigError> {
        Self::build(config, base_dir, None)
    }

    /// Build settings with `data_dir` in place of the configured one.
    ///
    /// Relative `database`, `output_dir` and `work_dir` values resolve against
    /// `data_dir`; absolute ones are kept.
    pub fn from_config_with_data_dir(
        config: &Config,
        base_dir: &Path,
        data_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        Self::build(config, base_dir, Some(data_dir))
    }

    fn build(
        config: &Config,
        base_dir: &Path,
        data_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let data_dir = data_dir.or_else(|| {
            config
                .data_dir
                .as_ref()
                .map(|dir| resolve_path(dir, base_dir))
        });
        let mut settings = match data_dir {
            Some(dir) => Self::with_data_dir(dir),
            None => Self::default(),
        };
        if let Some(ref database) = config.database {
            settings.database_path = resolve_path(database, &settings.data_dir);
        }
        if let Some(ref output) = config.output_dir {
            settings.output_dir = resolve_path(output, &settings.data_dir);
        }
        if let Some(ref work) = config.work_dir {
            settings.work_dir = resolve_path(work, &settings.data_dir);
        }
        settings.recognition = config.recognition.clone();
        settings.ocr = config.ocr.clone();
        settings.naming = config.naming.clone();
        settings.extraction = config.extraction.clone();
        settings.tools = config.tools.clone();
        settings.lock = config.lock.clone();
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recognition.dpi == 0 {
            return Err(ConfigError::Invalid("recognition.dpi must be positive".into()));
        }
        if self.extraction.primary == self.extraction.secondary {
            tracing::warn!(
                "extraction.primary and extraction.secondary are both {}; fallback will retry the same engine",
                self.extraction.primary
            );
        }
        if self.naming.no_separator_code.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "naming.no_separator_code must not be empty".into(),
            ));
        }
        for pattern in &self.naming.patterns {
            regex::Regex::new(&pattern.regex).map_err(|source| ConfigError::InvalidPattern {
                name: pattern.name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory override (--target flag).
    pub data_dir: Option<PathBuf>,
}

/// Load config and resolve settings.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<Settings, ConfigError> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await?,
    }
    .with_env_overrides();

    let base_dir = config
        .base_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    match options.data_dir {
        Some(dir) => Settings::from_config_with_data_dir(&config, &base_dir, dir),
        None => Settings::from_config(&config, &base_dir),
    }
}
