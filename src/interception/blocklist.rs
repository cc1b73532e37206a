// src/interception/blocklist.rs
//! Domain blocklist
//!
//! A blocked domain also blocks every subdomain: `ads.example` matches
//! `ads.example` and `cdn.ads.example` but not `badads.example`. Entries
//! written as `*.ads.example` are treated the same as `ads.example`.

use crate::utils::errors::{EngineError, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Predicate consulted by the gate before any interception decision
pub trait DomainFilter: Send + Sync {
    fn is_blocked(&self, domain: &str) -> bool;
}

impl<F> DomainFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_blocked(&self, domain: &str) -> bool {
        self(domain)
    }
}

/// Static set of blocked domains
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    domains: HashSet<String>,
}

impl Blocklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for domain in domains {
            list.insert(domain.as_ref());
        }
        list
    }

    /// Load a JSON array of domains
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::ConfigError(format!("Failed to read blocklist {}: {}", path.display(), e))
        })?;
        let domains: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
            EngineError::ConfigError(format!("Invalid blocklist {}: {}", path.display(), e))
        })?;

        let list = Self::from_domains(domains);
        info!("Blocklist loaded with {} domains", list.len());
        Ok(list)
    }

    pub fn insert(&mut self, domain: &str) {
        let normalized = normalize(domain);
        if !normalized.is_empty() {
            self.domains.insert(normalized);
        }
    }

    pub fn remove(&mut self, domain: &str) -> bool {
        self.domains.remove(&normalize(domain))
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl DomainFilter for Blocklist {
    fn is_blocked(&self, domain: &str) -> bool {
        let host = normalize(domain);
        let mut candidate = host.as_str();

        // Walk up the labels: a.b.example -> b.example -> example
        loop {
            if self.domains.contains(candidate) {
                debug!("Blocked {} via {}", host, candidate);
                return true;
            }
            match candidate.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => candidate = parent,
                _ => return false,
            }
        }
    }
}

fn normalize(domain: &str) -> String {
    domain
        .trim()
        .trim_start_matches("*.")
        .trim_end_matches('.')
        .to_ascii_lowercase()
}
