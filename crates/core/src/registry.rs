//! Alias table: maps image or service identifiers to deploy targets.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{TargetKey, TargetSpec};

/// How an identifier is compared against aliases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Alias text appears anywhere in the identifier. `auth` matches `author-service`.
    #[default]
    Substring,
    /// Alias equals the identifier's last path segment with any tag or digest removed.
    Strict,
}

impl FromStr for MatchMode {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substring" | "loose" => Ok(MatchMode::Substring),
            "strict" | "exact" => Ok(MatchMode::Strict),
            other => Err(RegistryError::UnknownMatchMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("target table entry {index} has an empty {field}")]
    EmptyField { index: usize, field: &'static str },
    #[error("unknown match mode: {0} (expect substring or strict)")]
    UnknownMatchMode(String),
}

/// Immutable alias table. Declaration order is significant: the first match wins.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    specs: Vec<TargetSpec>,
    mode: MatchMode,
}

impl TargetRegistry {
    pub fn new(specs: Vec<TargetSpec>, mode: MatchMode) -> Result<Self, RegistryError> {
        for (index, spec) in specs.iter().enumerate() {
            let field = if spec.alias.trim().is_empty() {
                "alias"
            } else if spec.namespace.trim().is_empty() {
                "namespace"
            } else if spec.workload.trim().is_empty() {
                "workload"
            } else {
                continue;
            };
            return Err(RegistryError::EmptyField { index, field });
        }
        Ok(Self { specs, mode })
    }

    pub fn mode(&self) -> MatchMode { self.mode }
    pub fn specs(&self) -> &[TargetSpec] { &self.specs }
    pub fn len(&self) -> usize { self.specs.len() }
    pub fn is_empty(&self) -> bool { self.specs.is_empty() }

    /// Resolve an identifier to its target. `None` is an ordinary outcome.
    pub fn resolve(&self, identifier: &str) -> Option<TargetKey> {
        let spec = match self.mode {
            MatchMode::Substring => self.specs.iter().find(|s| identifier.contains(s.alias.as_str())),
            MatchMode::Strict => {
                let name = bare_name(identifier);
                self.specs.iter().find(|s| s.alias == name)
            }
        };
        spec.map(TargetSpec::key)
    }

    /// Distinct targets in first-declaration order.
    pub fn targets(&self) -> Vec<TargetKey> {
        let mut out: Vec<TargetKey> = Vec::new();
        for spec in &self.specs {
            let key = spec.key();
            if !out.contains(&key) {
                out.push(key);
            }
        }
        out
    }
}

/// `registry.example:5000/team/auth-service:v2` -> `auth-service`
fn bare_name(identifier: &str) -> &str {
    let last = identifier.rsplit('/').next().unwrap_or(identifier);
    let last = last.split('@').next().unwrap_or(last);
    last.split(':').next().unwrap_or(last)
}
