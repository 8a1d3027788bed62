use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::identity::digest::ExactDigest;

/// Striped per-digest mutual exclusion.
///
/// Digests hash onto a fixed number of stripes. Two imports of the same digest
/// always contend; different digests only contend when they share a stripe.
pub struct DigestLocks {
    stripes: Vec<Mutex<()>>,
}

impl DigestLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn lock(&self, digest: &ExactDigest) -> DigestGuard<'_> {
        let guard = self.stripes[self.stripe_for(digest)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        DigestGuard { _guard: guard, digest: *digest }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe_for(&self, digest: &ExactDigest) -> usize {
        let bytes = digest.as_bytes();
        let prefix = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        (prefix % self.stripes.len() as u64) as usize
    }
}

/// Held for the lookup and the commit of one digest.
pub struct DigestGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    digest: ExactDigest,
}

impl DigestGuard<'_> {
    pub fn digest(&self) -> &ExactDigest {
        &self.digest
    }
}
