//! Per-class equation cache keyed by the class file's content hash.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use lru::LruCache;
use tracing::{debug, warn};

use crate::analysis::codec;
use crate::analysis::key::HMember;
use crate::analysis::result::Equations;

/// SHA-256 of a class file.
pub type ContentHash = [u8; 32];

/// Hashed equations of every member of one class.
pub type ClassEquations = Vec<(HMember, Equations)>;

/// Storage for class equations. Implementations must be safe to share across workers.
pub trait EquationCache: Send + Sync {
    fn get(&self, hash: &ContentHash) -> Option<ClassEquations>;
    fn put(&self, hash: ContentHash, equations: &ClassEquations) -> Result<()>;
    fn invalidate(&self, hash: &ContentHash);
    fn clear(&self);
}

/// In-memory cache holding encoded class bundles, evicting least recently used entries.
pub struct LruEquationCache {
    entries: Mutex<LruCache<ContentHash, Vec<u8>>>,
}

impl LruEquationCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<ContentHash, Vec<u8>>> {
        // Entries are replaced whole, so a poisoned lock still guards consistent data.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EquationCache for LruEquationCache {
    fn get(&self, hash: &ContentHash) -> Option<ClassEquations> {
        let bytes = self.lock().get(hash).cloned()?;
        match codec::decode_class(&bytes) {
            Ok(equations) => Some(equations),
            Err(err) => {
                warn!("dropping undecodable cache entry: {err:#}");
                self.invalidate(hash);
                None
            }
        }
    }

    fn put(&self, hash: ContentHash, equations: &ClassEquations) -> Result<()> {
        let bytes = codec::encode_class(equations)?;
        debug!("cache: storing {} bytes", bytes.len());
        self.lock().put(hash, bytes);
        Ok(())
    }

    fn invalidate(&self, hash: &ContentHash) {
        self.lock().pop(hash);
    }

    fn clear(&self) {
        self.lock().clear();
    }
}
