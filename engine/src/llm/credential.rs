//! Credential pool and exhaustion registry (§4.3).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ApiKey,
    Oauth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub name: String,
    pub kind: CredentialKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub account_label: String,
    #[serde(default)]
    pub key: Option<String>,
}

fn default_true() -> bool {
    true
}

/// The per-user credential registry file (§4.3, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialRegistry {
    pub credentials: Vec<Credential>,
}

impl CredentialRegistry {
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Per-user JSON file recording, per credential, when it becomes usable again (§4.3).
/// Entries whose `unusable_until` has already passed are dropped on load ("automatically
/// reactivated").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExhaustionRegistry {
    entries: HashMap<String, DateTime<Utc>>,
}

impl ExhaustionRegistry {
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let mut registry: Self = serde_json::from_str(&content)?;
        registry.reactivate_expired(Utc::now());
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn reactivate_expired(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, until| *until > now);
    }

    pub fn is_exhausted(&self, name: &str, now: DateTime<Utc>) -> bool {
        self.entries.get(name).is_some_and(|until| *until > now)
    }

    /// Last writer wins (§5: safe, at worst briefly marks an available credential as
    /// exhausted).
    pub fn mark_exhausted(&mut self, name: &str, until: DateTime<Utc>) {
        self.entries.insert(name.to_string(), until);
    }
}

/// Combines the registry and the exhaustion file to select the next usable credential,
/// tried in registry order (§4.3).
pub struct CredentialPool {
    registry: CredentialRegistry,
    exhaustion: ExhaustionRegistry,
    /// When set, every `mark_exhausted` call is immediately persisted here so quota
    /// exhaustion survives process exit and is visible to the next invocation (§4.3, §6)
    /// rather than living only in this pool's memory for the lifetime of one `invoke()`.
    exhaustion_path: Option<PathBuf>,
}

impl CredentialPool {
    pub fn new(registry: CredentialRegistry, exhaustion: ExhaustionRegistry) -> Self {
        Self { registry, exhaustion, exhaustion_path: None }
    }

    /// Persists the exhaustion registry to `path` on every future `mark_exhausted` call.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.exhaustion_path = Some(path.into());
        self
    }

    pub fn next_available(&self, now: DateTime<Utc>) -> Option<&Credential> {
        self.registry
            .credentials
            .iter()
            .find(|c| c.enabled && !self.exhaustion.is_exhausted(&c.name, now))
    }

    /// Same as [`Self::next_available`] but also skips credentials already tried within
    /// the current `invoke()` call — `next_available` alone is stateless across calls, so
    /// without this a rotation decision that doesn't mark the credential exhausted (e.g.
    /// `auth_error`, `model_downgrade`) would just select the same credential again.
    pub fn next_available_excluding(
        &self,
        now: DateTime<Utc>,
        excluded: &std::collections::HashSet<String>,
    ) -> Option<&Credential> {
        self.registry
            .credentials
            .iter()
            .find(|c| c.enabled && !excluded.contains(&c.name) && !self.exhaustion.is_exhausted(&c.name, now))
    }

    pub fn mark_exhausted(&mut self, name: &str, until: DateTime<Utc>) {
        self.exhaustion.mark_exhausted(name, until);
        if let Some(path) = &self.exhaustion_path {
            let _ = self.exhaustion.save(path);
        }
    }

    pub fn all_exhausted(&self, now: DateTime<Utc>) -> bool {
        self.registry
            .credentials
            .iter()
            .filter(|c| c.enabled)
            .all(|c| self.exhaustion.is_exhausted(&c.name, now))
    }

    pub fn exhaustion_registry(&self) -> &ExhaustionRegistry {
        &self.exhaustion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn credential(name: &str) -> Credential {
        Credential {
            name: name.to_string(),
            kind: CredentialKind::Oauth,
            enabled: true,
            account_label: format!("{name}-label"),
            key: None,
        }
    }

    #[test]
    fn next_available_skips_exhausted_credentials() {
        let registry = CredentialRegistry {
            credentials: vec![credential("A"), credential("B")],
        };
        let mut exhaustion = ExhaustionRegistry::default();
        let now = Utc::now();
        exhaustion.mark_exhausted("A", now + Duration::hours(1));
        let pool = CredentialPool::new(registry, exhaustion);

        let next = pool.next_available(now).unwrap();
        assert_eq!(next.name, "B");
    }

    #[test]
    fn next_available_skips_disabled_credentials() {
        let mut b = credential("B");
        b.enabled = false;
        let registry = CredentialRegistry {
            credentials: vec![b, credential("C")],
        };
        let pool = CredentialPool::new(registry, ExhaustionRegistry::default());
        assert_eq!(pool.next_available(Utc::now()).unwrap().name, "C");
    }

    #[test]
    fn all_exhausted_true_when_every_enabled_credential_is_marked() {
        let registry = CredentialRegistry {
            credentials: vec![credential("A"), credential("B")],
        };
        let mut exhaustion = ExhaustionRegistry::default();
        let now = Utc::now();
        exhaustion.mark_exhausted("A", now + Duration::hours(1));
        exhaustion.mark_exhausted("B", now + Duration::hours(1));
        let pool = CredentialPool::new(registry, exhaustion);
        assert!(pool.all_exhausted(now));
    }

    #[test]
    fn exhaustion_entries_reactivate_after_expiry() {
        let mut exhaustion = ExhaustionRegistry::default();
        let now = Utc::now();
        exhaustion.mark_exhausted("A", now - Duration::hours(1));
        exhaustion.reactivate_expired(now);
        assert!(!exhaustion.is_exhausted("A", now));
    }

    #[test]
    fn registry_round_trips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let registry = CredentialRegistry {
            credentials: vec![credential("A")],
        };
        registry.save(&path).unwrap();
        let loaded = CredentialRegistry::load(&path).unwrap();
        assert_eq!(loaded.credentials.len(), 1);
        assert_eq!(loaded.credentials[0].name, "A");
    }

    #[test]
    fn next_available_excluding_skips_tried_credentials_even_if_not_exhausted() {
        let registry = CredentialRegistry {
            credentials: vec![credential("A"), credential("B")],
        };
        let pool = CredentialPool::new(registry, ExhaustionRegistry::default());
        let mut tried = std::collections::HashSet::new();
        tried.insert("A".to_string());
        let next = pool.next_available_excluding(Utc::now(), &tried).unwrap();
        assert_eq!(next.name, "B");
    }

    #[test]
    fn next_available_excluding_returns_none_when_all_tried() {
        let registry = CredentialRegistry {
            credentials: vec![credential("A")],
        };
        let pool = CredentialPool::new(registry, ExhaustionRegistry::default());
        let mut tried = std::collections::HashSet::new();
        tried.insert("A".to_string());
        assert!(pool.next_available_excluding(Utc::now(), &tried).is_none());
    }

    #[test]
    fn mark_exhausted_persists_immediately_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exhaustion.json");
        let registry = CredentialRegistry {
            credentials: vec![credential("A")],
        };
        let mut pool = CredentialPool::new(registry, ExhaustionRegistry::default()).with_persistence(path.clone());
        let until = Utc::now() + Duration::hours(1);
        pool.mark_exhausted("A", until);

        let reloaded = ExhaustionRegistry::load(&path).unwrap();
        assert!(reloaded.is_exhausted("A", Utc::now()));
    }

    #[test]
    fn missing_registry_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let loaded = CredentialRegistry::load(&path).unwrap();
        assert!(loaded.credentials.is_empty());
    }
}
