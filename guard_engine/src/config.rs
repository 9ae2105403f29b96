//! Configuration loading and resolution for the guard engine.
//!
//! Resolution order, first file found wins:
//!
//! 1. `safeharbor.toml` (`[guard]` section) in the given root
//! 2. `safeharbor.yaml` / `safeharbor.yml` (`guard:` key)
//! 3. Built-in defaults
//!
//! Configuration is read once at process start and handed to the engine as a
//! validated value; malformed files fail construction (E901) and are never a
//! per-request concern.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default minimum patient count threshold (Safe Harbor guidance).
pub const DEFAULT_MIN_PATIENT_COUNT: u64 = 20_000;

/// Default maximum accepted query length, in characters.
pub const DEFAULT_MAX_QUERY_LENGTH: usize = 10_000;

/// Default row cap for sample execution results.
pub const DEFAULT_MAX_SAMPLE_ROWS: usize = 10_000;

/// Default advisory timeout for sample execution, in milliseconds.
pub const DEFAULT_SAMPLE_TIMEOUT_MS: u64 = 500;

// ---------------------------------------------------------------------------
// Injection pattern lists
// ---------------------------------------------------------------------------

/// Pattern lists for the injection scan layer.
///
/// Phrases and keywords are matched case-insensitively against comment and
/// string-literal content; encoding patterns are regular expressions compiled
/// when the layer is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionPatterns {
    /// Single words that read as directives ("ignore", "bypass", ...).
    pub instruction_keywords: Vec<String>,

    /// Privileged-role words that trigger E703 in any context.
    pub privilege_keywords: Vec<String>,

    /// Multi-word phrases checked before single keywords.
    pub dangerous_phrases: Vec<String>,

    /// Regex source strings for encoding/obfuscation detection.
    pub encoding_patterns: Vec<String>,

    /// Phrases shorter than this are ignored (single-word noise guard).
    pub min_phrase_length: usize,
}

impl Default for InjectionPatterns {
    fn default() -> Self {
        Self {
            instruction_keywords: ["ignore", "disable", "override", "bypass"]
                .map(str::to_owned)
                .to_vec(),
            privilege_keywords: ["admin", "root", "superuser"].map(str::to_owned).to_vec(),
            dangerous_phrases: [
                "ignore previous instructions",
                "disable validation",
                "bypass security",
            ]
            .map(str::to_owned)
            .to_vec(),
            encoding_patterns: [r"\\x[0-9a-fA-F]{2}", r"\\u[0-9a-fA-F]{4}"]
                .map(str::to_owned)
                .to_vec(),
            min_phrase_length: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Main config
// ---------------------------------------------------------------------------

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Minimum patient count enforced by the threshold wrapper.
    pub min_patient_count: u64,

    /// Maximum accepted query length in characters (enforced in Layer 0).
    pub max_query_length: usize,

    /// Whether the injection scan layer runs.
    pub enable_injection_scan: bool,

    /// Row cap for sample execution results.
    pub max_sample_rows: usize,

    /// Advisory timeout handed to the sample executor, in milliseconds.
    pub sample_timeout_ms: u64,

    /// Pattern lists for the injection scan layer.
    pub injection: InjectionPatterns,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_patient_count: DEFAULT_MIN_PATIENT_COUNT,
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
            enable_injection_scan: false,
            max_sample_rows: DEFAULT_MAX_SAMPLE_ROWS,
            sample_timeout_ms: DEFAULT_SAMPLE_TIMEOUT_MS,
            injection: InjectionPatterns::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// File deserialization helpers
// ---------------------------------------------------------------------------

/// Raw structure for `safeharbor.toml` / `safeharbor.yaml`.
#[derive(Debug, Deserialize)]
struct GuardFile {
    guard: Option<GuardSection>,
}

/// The `[guard]` section. Every field optional; unset fields keep defaults.
#[derive(Debug, Deserialize)]
struct GuardSection {
    min_patient_count: Option<u64>,
    max_query_length: Option<usize>,
    enable_injection_scan: Option<bool>,
    max_sample_rows: Option<usize>,
    sample_timeout_ms: Option<u64>,
    injection: Option<InjectionSection>,
}

#[derive(Debug, Deserialize)]
struct InjectionSection {
    instruction_keywords: Option<Vec<String>>,
    privilege_keywords: Option<Vec<String>>,
    dangerous_phrases: Option<Vec<String>>,
    encoding_patterns: Option<Vec<String>>,
    min_phrase_length: Option<usize>,
}

/// Apply a parsed section onto a config, overriding only set values.
fn apply_section(config: &mut GuardConfig, section: &GuardSection) {
    if let Some(v) = section.min_patient_count {
        config.min_patient_count = v;
    }
    if let Some(v) = section.max_query_length {
        config.max_query_length = v;
    }
    if let Some(v) = section.enable_injection_scan {
        config.enable_injection_scan = v;
    }
    if let Some(v) = section.max_sample_rows {
        config.max_sample_rows = v;
    }
    if let Some(v) = section.sample_timeout_ms {
        config.sample_timeout_ms = v;
    }
    if let Some(ref inj) = section.injection {
        if let Some(ref v) = inj.instruction_keywords {
            config.injection.instruction_keywords = v.clone();
        }
        if let Some(ref v) = inj.privilege_keywords {
            config.injection.privilege_keywords = v.clone();
        }
        if let Some(ref v) = inj.dangerous_phrases {
            config.injection.dangerous_phrases = v.clone();
        }
        if let Some(ref v) = inj.encoding_patterns {
            config.injection.encoding_patterns = v.clone();
        }
        if let Some(v) = inj.min_phrase_length {
            config.injection.min_phrase_length = v;
        }
    }
}

impl GuardConfig {
    /// Load configuration from a deployment root.
    ///
    /// Checks `safeharbor.toml`, then `safeharbor.yaml`/`safeharbor.yml`;
    /// the first file found wins and later candidates are not consulted.
    /// A missing root or missing files yield the defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a found file cannot be read or parsed.
    pub fn load_from_root(root: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let toml_path = root.join("safeharbor.toml");
        if toml_path.is_file() {
            let content = std::fs::read_to_string(&toml_path)
                .map_err(|e| ConfigError::Read(toml_path.display().to_string(), e.to_string()))?;
            let parsed: GuardFile = toml::from_str(&content)
                .map_err(|e| ConfigError::Parse(toml_path.display().to_string(), e.to_string()))?;
            if let Some(ref section) = parsed.guard {
                apply_section(&mut config, section);
            }
            return Ok(config);
        }

        for name in &["safeharbor.yaml", "safeharbor.yml"] {
            let yaml_path = root.join(name);
            if yaml_path.is_file() {
                let content = std::fs::read_to_string(&yaml_path).map_err(|e| {
                    ConfigError::Read(yaml_path.display().to_string(), e.to_string())
                })?;
                let parsed: GuardFile = serde_yaml::from_str(&content).map_err(|e| {
                    ConfigError::Parse(yaml_path.display().to_string(), e.to_string())
                })?;
                if let Some(ref section) = parsed.guard {
                    apply_section(&mut config, section);
                }
                return Ok(config);
            }
        }

        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
