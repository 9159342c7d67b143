//! Environment-driven configuration.
//!
//! | variable              | default                        |
//! |-----------------------|--------------------------------|
//! | `OPFIX_CORPUS_DIR`    | `./corpus`                     |
//! | `OPFIX_OUT_DIR`       | `./fixtures`                   |
//! | `OPFIX_METADATA`      | `<corpus dir>/metadata.json`   |
//! | `OPFIX_VARIANT`       | `8088`                         |
//! | `OPFIX_SKIP`          | none (`FE.2,9B` style list)    |
//! | `OPFIX_REPORT_CYCLES` | `1`                            |

use std::path::PathBuf;

use thiserror::Error;

use crate::policy::{SkipRule, Variant};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for env var {var}: {reason}")]
    InvalidEnv { var: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenConfig {
    pub corpus_dir: PathBuf,
    pub out_dir: PathBuf,
    pub metadata: PathBuf,
    pub variant: Variant,
    pub extra_skips: Vec<SkipRule>,
}

impl GenConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`GenConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let corpus_dir =
            PathBuf::from(non_empty("OPFIX_CORPUS_DIR").unwrap_or_else(|| "./corpus".into()));
        let out_dir =
            PathBuf::from(non_empty("OPFIX_OUT_DIR").unwrap_or_else(|| "./fixtures".into()));
        let metadata = non_empty("OPFIX_METADATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| corpus_dir.join("metadata.json"));

        let variant = match non_empty("OPFIX_VARIANT") {
            Some(raw) => raw.parse::<Variant>().map_err(|reason| ConfigError::InvalidEnv {
                var: "OPFIX_VARIANT",
                reason,
            })?,
            None => Variant::I8088,
        };

        let extra_skips = match non_empty("OPFIX_SKIP") {
            Some(raw) => parse_skip_list(&raw).map_err(|reason| ConfigError::InvalidEnv {
                var: "OPFIX_SKIP",
                reason,
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            corpus_dir,
            out_dir,
            metadata,
            variant,
            extra_skips,
        })
    }
}

/// Comma or whitespace separated skip rules.
pub fn parse_skip_list(raw: &str) -> Result<Vec<SkipRule>, String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::parse::<SkipRule>)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Log cycle-count differences. They never fail a vector.
    pub report_cycles: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            report_cycles: true,
        }
    }
}

impl ReplayOptions {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let report_cycles = match lookup("OPFIX_REPORT_CYCLES").as_deref().map(str::trim) {
            None | Some("") => true,
            Some("1" | "true" | "on") => true,
            Some("0" | "false" | "off") => false,
            Some(other) => {
                return Err(ConfigError::InvalidEnv {
                    var: "OPFIX_REPORT_CYCLES",
                    reason: format!("expected 0 or 1, got {other:?}"),
                })
            }
        };
        Ok(Self { report_cycles })
    }
}
