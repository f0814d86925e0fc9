use meshchat_shared::constants::{SAVED_EMAIL_KEY, SAVED_USERNAME_KEY};
use meshchat_shared::identity::{IdentityKind, PeerIdentity};

use crate::error::Result;
use crate::kv::KeyValueStore;

/// Account details remembered between sessions to prefill the join form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedAccount {
    pub email: String,
    pub username: String,
}

impl SavedAccount {
    /// Persist `identity` if it is an account. Guests leave no trace.
    /// Returns whether anything was written.
    pub fn save(store: &dyn KeyValueStore, identity: &PeerIdentity) -> Result<bool> {
        if identity.kind != IdentityKind::Account {
            return Ok(false);
        }
        let Some(email) = identity.email.as_deref() else {
            return Ok(false);
        };
        store.set(SAVED_EMAIL_KEY, email)?;
        store.set(SAVED_USERNAME_KEY, &identity.username)?;
        Ok(true)
    }

    /// Both values must be present for an account to be restored.
    pub fn load(store: &dyn KeyValueStore) -> Result<Option<Self>> {
        let email = store.get(SAVED_EMAIL_KEY)?.filter(|v| !v.is_empty());
        let username = store.get(SAVED_USERNAME_KEY)?.filter(|v| !v.is_empty());
        Ok(match (email, username) {
            (Some(email), Some(username)) => Some(Self { email, username }),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[test]
    fn test_account_is_saved_and_loaded() {
        let store = MemoryStore::new();
        let identity = PeerIdentity::account("neo", "neo@example.org").unwrap();

        assert!(SavedAccount::save(&store, &identity).unwrap());
        assert_eq!(
            SavedAccount::load(&store).unwrap(),
            Some(SavedAccount {
                email: "neo@example.org".to_string(),
                username: "neo".to_string(),
            })
        );
    }

    #[test]
    fn test_guest_is_not_saved() {
        let store = MemoryStore::new();
        let identity = PeerIdentity::guest("visitor").unwrap();

        assert!(!SavedAccount::save(&store, &identity).unwrap());
        assert_eq!(SavedAccount::load(&store).unwrap(), None);
    }

    #[test]
    fn test_partial_entry_is_ignored() {
        let store = MemoryStore::new();
        store.set(SAVED_USERNAME_KEY, "neo").unwrap();
        assert_eq!(SavedAccount::load(&store).unwrap(), None);
    }
}
