use std::collections::BTreeMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::credential::Credential;

/// Concurrent identity -> credential map.
///
/// Every operation is atomic per identity: readers see either the old or the
/// new credential, never a partial write.
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: DashMap<String, Credential>,
}

impl CredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, identity: &str) -> Option<Credential> {
        self.entries.get(identity).map(|entry| entry.value().clone())
    }

    /// Insert or replace the credential under its own identity.
    pub fn put(&self, credential: Credential) {
        self.entries
            .insert(credential.identity().to_owned(), credential);
    }

    /// Remove and return the credential for `identity`.
    #[must_use]
    pub fn remove(&self, identity: &str) -> Option<Credential> {
        self.entries.remove(identity).map(|(_, credential)| credential)
    }

    /// Replace the stored credential with `credential` only if one is stored
    /// under its identity and `current` accepts it.
    ///
    /// Returns `false` when the identity is absent or `current` rejects the
    /// stored value; `credential` is dropped in that case.
    #[must_use]
    pub fn replace_if<F>(&self, credential: Credential, current: F) -> bool
    where
        F: FnOnce(&Credential) -> bool,
    {
        match self.entries.entry(credential.identity().to_owned()) {
            Entry::Occupied(mut slot) if current(slot.get()) => {
                slot.insert(credential);
                true
            }
            Entry::Occupied(_) | Entry::Vacant(_) => false,
        }
    }

    /// Atomically replace the stored credential with `f(current)` when `f`
    /// returns `Some`. Returns `true` if a replacement happened.
    #[must_use]
    pub fn modify<F>(&self, identity: &str, f: F) -> bool
    where
        F: FnOnce(&Credential) -> Option<Credential>,
    {
        let Some(mut entry) = self.entries.get_mut(identity) else {
            return false;
        };
        match f(entry.value()) {
            Some(replacement) => {
                *entry.value_mut() = replacement;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    /// Sorted list of stored identities.
    #[must_use]
    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort_unstable();
        ids
    }

    /// Point-in-time copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Credential> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Drop everything and load `credentials` instead.
    pub fn replace_all(&self, credentials: BTreeMap<String, Credential>) {
        self.entries.clear();
        for (_, credential) in credentials {
            self.put(credential);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
