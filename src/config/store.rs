//! Per-target configuration store
//!
//! Holds one [`GwasConfig`] per deployment target. Updates are last-write-wins
//! per field. The only cross-field check made at write time is the data-party
//! range invariant (`sRole < numS`); everything else is validated when the
//! configuration is consumed.

use super::field::ConfigField;
use super::shared::SharedConfig;
use super::{DeploymentTarget, GwasConfig};
use crate::error::ValidationError;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Result of a single field update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied(ConfigField),
    /// Field name not recognised; nothing changed
    Ignored,
}

/// Keyed store of per-target configurations
#[derive(Debug, Default)]
pub struct ConfigStore {
    entries: RwLock<BTreeMap<DeploymentTarget, GwasConfig>>,
}

fn check_data_party(config: &GwasConfig) -> Result<(), ValidationError> {
    if let (Some(s_role), Some(num_s)) = (config.s_role, config.num_s) {
        if s_role >= num_s {
            return Err(ValidationError::DataPartyOutOfRange { s_role, num_s });
        }
    }
    Ok(())
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from previously saved entries
    pub fn from_entries(entries: impl IntoIterator<Item = (DeploymentTarget, GwasConfig)>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().collect()),
        }
    }

    /// Configuration for `target`, created with defaults on first access
    pub fn get(&self, target: &DeploymentTarget) -> GwasConfig {
        if let Some(config) = self.peek(target) {
            return config;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(target.clone()).or_default().clone()
    }

    /// Configuration for `target` without creating it
    pub fn peek(&self, target: &DeploymentTarget) -> Option<GwasConfig> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(target).cloned()
    }

    /// Apply raw tokens to one named field
    ///
    /// Unknown names are ignored. A token that fails to parse, or a write that
    /// would put `sRole` out of range, is rejected and leaves the stored
    /// configuration unchanged.
    pub fn update<S: AsRef<str>>(
        &self,
        target: &DeploymentTarget,
        field_name: &str,
        tokens: &[S],
    ) -> Result<UpdateOutcome, ValidationError> {
        let Some(field) = ConfigField::parse(field_name) else {
            debug!(%target, field = field_name, "ignoring unknown configuration field");
            return Ok(UpdateOutcome::Ignored);
        };

        self.modify(target, |config| field.apply(config, tokens))?;
        debug!(%target, %field, "configuration field updated");
        Ok(UpdateOutcome::Applied(field))
    }

    /// Apply a parsed shared configuration file as a single update
    pub fn load_shared(&self, target: &DeploymentTarget, shared: &SharedConfig) -> Result<(), ValidationError> {
        self.modify(target, |config| shared.apply_to(config))
    }

    /// Run `f` on a copy and commit it only if `f` and the range check succeed
    fn modify<F>(&self, target: &DeploymentTarget, f: F) -> Result<(), ValidationError>
    where
        F: FnOnce(&mut GwasConfig) -> Result<(), ValidationError>,
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut candidate = entries.get(target).cloned().unwrap_or_default();
        f(&mut candidate)?;
        check_data_party(&candidate)?;
        entries.insert(target.clone(), candidate);
        Ok(())
    }

    /// Drop the configuration of a torn-down target
    pub fn remove(&self, target: &DeploymentTarget) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(target).is_some()
    }

    pub fn targets(&self) -> Vec<DeploymentTarget> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys().cloned().collect()
    }

    /// Snapshot of every entry, for persistence
    pub fn entries(&self) -> Vec<(DeploymentTarget, GwasConfig)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|(t, c)| (t.clone(), c.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::shared::parse_shared_config;

    fn target() -> DeploymentTarget {
        DeploymentTarget::new("proj-cp1", "us-central1-a", "cp1")
    }

    #[test]
    fn test_get_creates_default() {
        let store = ConfigStore::new();
        assert!(store.peek(&target()).is_none());
        assert_eq!(store.get(&target()), GwasConfig::default());
        assert_eq!(store.targets(), vec![target()]);
    }

    #[test]
    fn test_update_last_write_wins() {
        let store = ConfigStore::new();
        store.update(&target(), "numSnps", &["100"]).unwrap();
        store.update(&target(), "NUM_SNPS", &["200"]).unwrap();
        assert_eq!(store.get(&target()).num_snps, Some(200));
    }

    #[test]
    fn test_unknown_field_ignored() {
        let store = ConfigStore::new();
        store.update(&target(), "numThreads", &["4"]).unwrap();
        let before = store.get(&target());

        let outcome = store.update(&target(), "csrf_token", &["abc"]).unwrap();
        assert_eq!(outcome, UpdateOutcome::Ignored);
        assert_eq!(store.get(&target()), before);
    }

    #[test]
    fn test_out_of_range_s_role_rejected() {
        let store = ConfigStore::new();
        store.update(&target(), "numS", &["3"]).unwrap();
        store.update(&target(), "sRole", &["1"]).unwrap();
        let before = store.get(&target());

        let err = store.update(&target(), "sRole", &["5"]).unwrap_err();
        assert_eq!(err, ValidationError::DataPartyOutOfRange { s_role: 5, num_s: 3 });
        assert_eq!(store.get(&target()), before);

        // Shrinking numS below the current sRole is rejected the same way
        assert!(store.update(&target(), "numS", &["1"]).is_err());
        assert_eq!(store.get(&target()).num_s, Some(3));
    }

    #[test]
    fn test_s_role_before_num_s() {
        let store = ConfigStore::new();
        // No numS yet, so the range cannot be checked at write time
        store.update(&target(), "sRole", &["2"]).unwrap();
        assert!(store.update(&target(), "numS", &["2"]).is_err());
        store.update(&target(), "numS", &["3"]).unwrap();
    }

    #[test]
    fn test_invalid_token_rejected() {
        let store = ConfigStore::new();
        assert!(store.update(&target(), "numThreads", &["four"]).is_err());
        assert_eq!(store.get(&target()).num_threads, None);
    }

    #[test]
    fn test_load_shared_is_atomic() {
        let store = ConfigStore::new();
        let mut shared = parse_shared_config(
            "P0 a\nP1 b\nP2 c\nP3 d\nP0_P1 8000\nP0_P2 8003\nP1_P2 8001\nP1_P3 8002\nP2_P3 8004\n\
             P0 p0\nP1 p1\nP2 p2\nP3 s0\nnumS 1\n",
        )
        .unwrap();
        shared.parameters.push(("sRole".to_string(), vec!["4".to_string()]));

        assert!(store.load_shared(&target(), &shared).is_err());
        assert_eq!(store.get(&target()), GwasConfig::default());

        shared.parameters.pop();
        store.load_shared(&target(), &shared).unwrap();
        assert_eq!(store.get(&target()).ip_addr[1], "b");
    }

    #[test]
    fn test_remove() {
        let store = ConfigStore::new();
        store.get(&target());
        assert!(store.remove(&target()));
        assert!(!store.remove(&target()));
        assert!(store.targets().is_empty());
    }
}
