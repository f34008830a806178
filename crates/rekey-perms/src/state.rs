//! Lock state of an identity's key versions.
//!
//! The lock table is an explicit `VersionState` per version. It is computed
//! by clients (only they can derive keys) as a list of [`LockTransition`]s,
//! and replayed by the authority. Replaying checks each transition's `from`
//! against the current state, so a transition list computed against an
//! outdated table is rejected as a whole.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use rekey_core::{KeyVersion, Login};

use crate::error::{PermsError, Result};

/// Lock state of one key version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionState {
    Unlocked,
    Locked,
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionState::Unlocked => f.write_str("unlocked"),
            VersionState::Locked => f.write_str("locked"),
        }
    }
}

/// One state change. `from` is `None` for a version being appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockTransition {
    pub version: KeyVersion,
    pub from: Option<VersionState>,
    pub to: VersionState,
}

/// Lock state for every version of one login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockTable {
    login: Login,
    /// Indexed by `KeyVersion::index`.
    states: Vec<VersionState>,
}

impl LockTable {
    /// An empty table (no versions yet).
    pub fn new(login: Login) -> Self {
        Self {
            login,
            states: Vec::new(),
        }
    }

    pub fn login(&self) -> &Login {
        &self.login
    }

    /// Number of versions tracked.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, version: KeyVersion) -> Option<VersionState> {
        if version.get() == 0 {
            return None;
        }
        self.states.get(version.index()).copied()
    }

    pub fn is_unlocked(&self, version: KeyVersion) -> bool {
        self.state(version) == Some(VersionState::Unlocked)
    }

    /// Locked versions, ascending.
    pub fn locked_versions(&self) -> Vec<KeyVersion> {
        self.versions_in(VersionState::Locked)
    }

    /// Unlocked versions, ascending.
    pub fn unlocked_versions(&self) -> Vec<KeyVersion> {
        self.versions_in(VersionState::Unlocked)
    }

    fn versions_in(&self, wanted: VersionState) -> Vec<KeyVersion> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == wanted)
            .map(|(i, _)| KeyVersion::from_index(i))
            .collect()
    }

    /// Transitions that bring the table to "exactly `reachable` is
    /// unlocked" over versions `1..=latest`.
    ///
    /// Used when a version is appended: the new credential decides what
    /// stays reachable.
    pub fn plan_recompute(
        &self,
        latest: KeyVersion,
        reachable: &BTreeSet<KeyVersion>,
    ) -> Vec<LockTransition> {
        (1..=latest.get())
            .map(KeyVersion)
            .filter_map(|version| {
                let to = if reachable.contains(&version) {
                    VersionState::Unlocked
                } else {
                    VersionState::Locked
                };
                let from = self.state(version);
                (from != Some(to)).then_some(LockTransition { version, from, to })
            })
            .collect()
    }

    /// Transitions unlocking every locked version in `reached`.
    ///
    /// Never locks anything. Empty when nothing new is reached, which makes
    /// repeated unlocks no-ops.
    pub fn plan_unlock(&self, reached: &BTreeSet<KeyVersion>) -> Vec<LockTransition> {
        self.locked_versions()
            .into_iter()
            .filter(|v| reached.contains(v))
            .map(|version| LockTransition {
                version,
                from: Some(VersionState::Locked),
                to: VersionState::Unlocked,
            })
            .collect()
    }

    /// Apply transitions atomically. On error the table is unchanged.
    pub fn apply(&mut self, transitions: &[LockTransition]) -> Result<()> {
        let mut next = self.states.clone();

        for t in transitions {
            let invalid = || PermsError::InvalidTransition {
                login: self.login.clone(),
                version: t.version,
            };
            if t.version.get() == 0 {
                return Err(invalid());
            }

            let index = t.version.index();
            let current = next.get(index).copied();
            if current != t.from {
                return Err(invalid());
            }

            match current {
                Some(_) => next[index] = t.to,
                None if index == next.len() => next.push(t.to),
                None => return Err(invalid()),
            }
        }

        for t in transitions {
            tracing::debug!(
                login = %self.login,
                version = t.version.get(),
                from = ?t.from,
                to = %t.to,
                "lock transition"
            );
        }
        self.states = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(versions: &[u32]) -> BTreeSet<KeyVersion> {
        versions.iter().copied().map(KeyVersion).collect()
    }

    fn table_with(n: u32, reachable: &[u32]) -> LockTable {
        let mut table = LockTable::new(Login::from("alice"));
        let plan = table.plan_recompute(KeyVersion(n), &set(reachable));
        table.apply(&plan).unwrap();
        table
    }

    #[test]
    fn test_append_unlocked_version() {
        let mut table = LockTable::new(Login::from("alice"));
        let plan = table.plan_recompute(KeyVersion(1), &set(&[1]));
        assert_eq!(
            plan,
            vec![LockTransition {
                version: KeyVersion(1),
                from: None,
                to: VersionState::Unlocked
            }]
        );
        table.apply(&plan).unwrap();
        assert!(table.is_unlocked(KeyVersion(1)));
    }

    #[test]
    fn test_recompute_locks_unreachable() {
        let table = table_with(2, &[1, 2]);
        let plan = table.plan_recompute(KeyVersion(3), &set(&[3]));

        let mut next = table.clone();
        next.apply(&plan).unwrap();
        assert_eq!(next.locked_versions(), vec![KeyVersion(1), KeyVersion(2)]);
        assert_eq!(next.unlocked_versions(), vec![KeyVersion(3)]);
    }

    #[test]
    fn test_plan_unlock_is_idempotent() {
        let mut table = table_with(5, &[4, 5]);
        let reached = set(&[1, 2, 3]);

        let plan = table.plan_unlock(&reached);
        assert_eq!(plan.len(), 3);
        table.apply(&plan).unwrap();

        assert!(table.plan_unlock(&reached).is_empty());
        assert!(table.locked_versions().is_empty());
    }

    #[test]
    fn test_stale_transitions_rejected() {
        let mut table = table_with(3, &[3]);
        let plan = table.plan_unlock(&set(&[1]));
        table.apply(&plan).unwrap();

        // Same plan again: v1 is no longer locked.
        let before = table.clone();
        assert!(matches!(
            table.apply(&plan),
            Err(PermsError::InvalidTransition { .. })
        ));
        assert_eq!(table, before);
    }

    #[test]
    fn test_append_must_be_next_version() {
        let mut table = table_with(1, &[1]);
        let skip = [LockTransition {
            version: KeyVersion(3),
            from: None,
            to: VersionState::Unlocked,
        }];
        assert!(table.apply(&skip).is_err());
        assert_eq!(table.len(), 1);
    }
}
