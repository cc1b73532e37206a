// src/interception/mode.rs
//! Interception modes
//!
//! Decides whether an admitted request is held for a manual decision.
//! `Matching` takes a URL glob where `*` matches any run of characters and
//! `?` a single character, compared case-insensitively against the full URL.

use crate::record::OutboundRequest;
use crate::utils::config::{InterceptionConfig, ModeSetting};
use crate::utils::errors::{EngineError, Result};
use regex::Regex;
use std::fmt;

/// Compiled URL glob
#[derive(Clone)]
pub struct UrlPattern {
    source: String,
    regex: Regex,
}

impl UrlPattern {
    pub fn new(glob: &str) -> Result<Self> {
        if glob.trim().is_empty() {
            return Err(EngineError::ConfigError(
                "interception pattern is empty".to_string(),
            ));
        }

        let mut expr = String::from("(?i)^");
        for ch in glob.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| {
            EngineError::ConfigError(format!("invalid interception pattern {:?}: {}", glob, e))
        })?;

        Ok(Self {
            source: glob.to_string(),
            regex,
        })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UrlPattern").field(&self.source).finish()
    }
}

/// Global interception mode
#[derive(Debug, Clone, Default)]
pub enum InterceptMode {
    /// Forward everything immediately
    #[default]
    Off,
    /// Hold every request
    All,
    /// Hold requests whose URL matches the pattern
    Matching(UrlPattern),
}

impl InterceptMode {
    pub fn matching(glob: &str) -> Result<Self> {
        Ok(InterceptMode::Matching(UrlPattern::new(glob)?))
    }

    pub fn from_config(config: &InterceptionConfig) -> Result<Self> {
        match config.mode {
            ModeSetting::Off => Ok(InterceptMode::Off),
            ModeSetting::All => Ok(InterceptMode::All),
            ModeSetting::Matching => {
                let pattern = config.pattern.as_deref().ok_or_else(|| {
                    EngineError::ConfigError(
                        "interception.pattern is required for matching mode".to_string(),
                    )
                })?;
                Self::matching(pattern)
            }
        }
    }

    pub fn should_hold(&self, request: &OutboundRequest) -> bool {
        match self {
            InterceptMode::Off => false,
            InterceptMode::All => true,
            InterceptMode::Matching(pattern) => pattern.matches(&request.url),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InterceptMode::Off => "off",
            InterceptMode::All => "all",
            InterceptMode::Matching(_) => "matching",
        }
    }
}
