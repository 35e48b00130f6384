use std::sync::Mutex;

use crate::config::Credentials;

/// The bounded set of game-client credential slots.
///
/// A slot is the unit of concurrency: it is acquired before a
/// supervisor is spawned, and released only after that supervisor has
/// torn down, on every terminal path. The pool is the only authority
/// over the in-use flags; credential ownership travels with the slot
/// index.
pub struct CredentialPool {
    credentials: Vec<Credentials>,
    in_use: Mutex<Vec<bool>>,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credentials>) -> CredentialPool {
        let n = credentials.len();
        assert!(n > 0, "pool needs at least one credential pair");
        CredentialPool {
            credentials,
            in_use: Mutex::new(vec![false; n]),
        }
    }

    /// Number of slots, free or not.
    pub fn size(&self) -> usize {
        self.credentials.len()
    }

    /// Mark the first free slot as in use and return its index, or
    /// `None` if every slot is taken. The smallest index wins, so slot
    /// usage is deterministic.
    pub fn acquire(&self) -> Option<usize> {
        let mut in_use = self.in_use.lock().unwrap();
        let slot = in_use.iter().position(|used| !used)?;
        in_use[slot] = true;
        log::debug!("acquired client slot {}", slot);
        Some(slot)
    }

    /// Return a slot to the free set. Releasing a free slot is a no-op.
    pub fn release(&self, slot: usize) {
        let mut in_use = self.in_use.lock().unwrap();
        if in_use[slot] {
            in_use[slot] = false;
            log::debug!("released client slot {}", slot);
        }
    }

    /// The credentials owned by a slot.
    pub fn credentials(&self, slot: usize) -> &Credentials {
        &self.credentials[slot]
    }

    /// How many slots are currently in use.
    pub fn active_count(&self) -> usize {
        self.in_use.lock().unwrap().iter().filter(|u| **u).count()
    }
}
