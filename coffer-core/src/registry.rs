/*!
Reference counting for the shared file pool.

Every file under `shared/` or `shared_checksum/` is tracked here, keyed
by its path relative to the backup directory. The refcount equals the
number of live committed manifests referencing the key; a zero-refcount
entry is a garbage-collection candidate and behaves like an absent key
for dedup decisions, so a name abandoned by deleted backups can be
written again.
*/

use std::collections::HashMap;

use tracing::debug;

use crate::{CofferError, Result};

/// Decision for a would-be shared copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDecision {
    /// Identical content is already in the pool; reference it without
    /// copying
    Skip,
    /// No live entry under this key; copy the bytes
    Copy,
    /// The key is live with different content; writing it would corrupt
    /// the backups that still reference it
    Collision,
}

#[derive(Debug, Clone)]
struct SharedFileInfo {
    refcount: u32,
    size: u64,
    checksum: Option<u32>,
}

/// Refcount table for the shared pool, rebuilt from committed manifests
/// at open and owned by the engine.
#[derive(Debug, Default)]
pub struct SharedFileRegistry {
    entries: HashMap<String, SharedFileInfo>,
}

impl SharedFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a would-be copy of `size`/`checksum` content to `key`.
    ///
    /// A checksum comparison needs both sides; when either is unknown
    /// the decision falls back to size alone.
    pub fn decide(&self, key: &str, size: u64, checksum: Option<u32>) -> CopyDecision {
        let Some(info) = self.entries.get(key).filter(|info| info.refcount > 0) else {
            return CopyDecision::Copy;
        };

        if info.size != size {
            return CopyDecision::Collision;
        }
        match (info.checksum, checksum) {
            (Some(existing), Some(incoming)) if existing != incoming => CopyDecision::Collision,
            _ => CopyDecision::Skip,
        }
    }

    /// Add one reference to `key`, creating or resurrecting the entry.
    ///
    /// Retaining a live key with conflicting size or checksum fails
    /// with a collision: it means two committed manifests disagree
    /// about the file's content, and the second one to load is the
    /// broken one.
    pub fn retain(&mut self, key: &str, size: u64, checksum: Option<u32>) -> Result<()> {
        match self.entries.get_mut(key) {
            Some(info) if info.refcount > 0 => {
                if info.size != size {
                    return Err(collision(key, "size differs from the pooled file"));
                }
                if let (Some(existing), Some(incoming)) = (info.checksum, checksum) {
                    if existing != incoming {
                        return Err(collision(key, "checksum differs from the pooled file"));
                    }
                }
                info.refcount += 1;
            }
            Some(info) => {
                // Zero-ref entry: the old content is abandoned, adopt
                // the new identity.
                *info = SharedFileInfo {
                    refcount: 1,
                    size,
                    checksum,
                };
            }
            None => {
                self.entries.insert(
                    key.to_string(),
                    SharedFileInfo {
                        refcount: 1,
                        size,
                        checksum,
                    },
                );
            }
        }
        Ok(())
    }

    /// Drop one reference to `key`, returning the remaining count. The
    /// entry survives at zero as a GC candidate; the file itself is
    /// never touched here.
    pub fn release(&mut self, key: &str) -> u32 {
        match self.entries.get_mut(key) {
            Some(info) => {
                info.refcount = info.refcount.saturating_sub(1);
                if info.refcount == 0 {
                    debug!(key, "shared file released to zero references");
                }
                info.refcount
            }
            None => {
                debug!(key, "released a shared file the registry never saw");
                0
            }
        }
    }

    /// True while at least one committed manifest references `key`.
    pub fn is_referenced(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|info| info.refcount > 0)
            .unwrap_or(false)
    }

    /// Current refcount for `key` (0 for unknown keys).
    pub fn refcount(&self, key: &str) -> u32 {
        self.entries.get(key).map(|info| info.refcount).unwrap_or(0)
    }

    /// Forget a key entirely; called after GC removes the file.
    pub fn forget(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

fn collision(key: &str, reason: &str) -> CofferError {
    CofferError::Collision {
        path: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refcount_lifecycle() {
        let mut registry = SharedFileRegistry::new();
        registry.retain("shared/000010.sst", 200, Some(77)).unwrap();
        registry.retain("shared/000010.sst", 200, Some(77)).unwrap();
        assert_eq!(registry.refcount("shared/000010.sst"), 2);

        assert_eq!(registry.release("shared/000010.sst"), 1);
        assert!(registry.is_referenced("shared/000010.sst"));
        assert_eq!(registry.release("shared/000010.sst"), 0);
        assert!(!registry.is_referenced("shared/000010.sst"));
    }

    #[test]
    fn test_decide_on_absent_and_zero_ref_keys() {
        let mut registry = SharedFileRegistry::new();
        assert_eq!(
            registry.decide("shared/000010.sst", 200, Some(77)),
            CopyDecision::Copy
        );

        registry.retain("shared/000010.sst", 200, Some(77)).unwrap();
        registry.release("shared/000010.sst");

        // Zero refs: different content may take over the name.
        assert_eq!(
            registry.decide("shared/000010.sst", 999, Some(1)),
            CopyDecision::Copy
        );
    }

    #[test]
    fn test_decide_skip_and_collision() {
        let mut registry = SharedFileRegistry::new();
        registry.retain("shared/000010.sst", 200, Some(77)).unwrap();

        assert_eq!(
            registry.decide("shared/000010.sst", 200, Some(77)),
            CopyDecision::Skip
        );
        assert_eq!(
            registry.decide("shared/000010.sst", 201, Some(77)),
            CopyDecision::Collision
        );
        assert_eq!(
            registry.decide("shared/000010.sst", 200, Some(78)),
            CopyDecision::Collision
        );
        // Unknown incoming checksum: size agreement is all we can check.
        assert_eq!(
            registry.decide("shared/000010.sst", 200, None),
            CopyDecision::Skip
        );
    }

    #[test]
    fn test_retain_conflict_is_a_collision() {
        let mut registry = SharedFileRegistry::new();
        registry.retain("shared/000010.sst", 200, Some(77)).unwrap();

        let err = registry
            .retain("shared/000010.sst", 200, Some(78))
            .unwrap_err();
        assert!(matches!(err, CofferError::Collision { .. }));
        assert!(err.is_corruption());

        assert!(registry.retain("shared/000010.sst", 200, None).is_ok());
        assert_eq!(registry.refcount("shared/000010.sst"), 2);
    }

    #[test]
    fn test_resurrected_entry_adopts_new_identity() {
        let mut registry = SharedFileRegistry::new();
        registry.retain("shared/000010.sst", 200, Some(77)).unwrap();
        registry.release("shared/000010.sst");

        registry.retain("shared/000010.sst", 300, Some(99)).unwrap();
        assert_eq!(
            registry.decide("shared/000010.sst", 300, Some(99)),
            CopyDecision::Skip
        );
        assert_eq!(
            registry.decide("shared/000010.sst", 200, Some(77)),
            CopyDecision::Collision
        );
    }

    #[test]
    fn test_release_unknown_key_is_tolerated() {
        let mut registry = SharedFileRegistry::new();
        assert_eq!(registry.release("shared/ghost.sst"), 0);
    }

    #[test]
    fn test_forget_clears_the_tombstone() {
        let mut registry = SharedFileRegistry::new();
        registry.retain("shared/000010.sst", 200, None).unwrap();
        registry.release("shared/000010.sst");
        registry.forget("shared/000010.sst");
        assert_eq!(registry.refcount("shared/000010.sst"), 0);
        assert_eq!(
            registry.decide("shared/000010.sst", 1, None),
            CopyDecision::Copy
        );
    }
}
