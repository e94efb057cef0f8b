/*!
The durable codec cache shared between connections.

Codecs are immutable and identified by type id, so a registry lookup can
hand out the same `Arc` to any number of connections; eviction only drops
the registry's own handle and never invalidates codecs still referenced
by in-flight requests.
*/

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};

use lru::LruCache;
use uuid::Uuid;

use crate::codec::Codec;
use crate::errors::{DecodeError, EncodeError};
use crate::value::Value;

pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// User-registered value adaptors composed around a base scalar codec.
///
/// The encode hook runs before the base encoder, the decode hook after
/// the base decoder.
pub struct ScalarOverride {
    pub encode: Box<dyn Fn(&Value) -> Result<Value, EncodeError> + Send + Sync>,
    pub decode: Box<dyn Fn(Value) -> Result<Value, DecodeError> + Send + Sync>,
}

pub struct CodecRegistry {
    codecs: Mutex<LruCache<Uuid, Arc<dyn Codec>>>,
    overrides: RwLock<HashMap<Uuid, Arc<ScalarOverride>>>,
}

impl CodecRegistry {
    pub fn new() -> CodecRegistry {
        CodecRegistry::with_capacity(DEFAULT_CACHE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> CodecRegistry {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        CodecRegistry {
            codecs: Mutex::new(LruCache::new(capacity)),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, id: &Uuid) -> Option<Arc<dyn Codec>> {
        self.codecs.lock().expect("codec cache lock").get(id).cloned()
    }

    /// Insert a freshly built codec.
    ///
    /// A concurrent build of the same descriptor may race here; the last
    /// writer wins, which is harmless because both codecs are immutable
    /// and equivalent.
    pub fn store(&self, id: Uuid, codec: Arc<dyn Codec>) {
        self.codecs.lock().expect("codec cache lock").put(id, codec);
    }

    pub fn len(&self) -> usize {
        self.codecs.lock().expect("codec cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register value adaptors for one scalar type id.
    ///
    /// Applies to codecs built after the call; cached codec trees built
    /// earlier are dropped so the override takes effect on next use.
    pub fn register_override(&self, id: Uuid, hooks: ScalarOverride) {
        self.overrides
            .write()
            .expect("override table lock")
            .insert(id, Arc::new(hooks));
        self.codecs.lock().expect("codec cache lock").clear();
    }

    pub fn override_for(&self, id: &Uuid) -> Option<Arc<ScalarOverride>> {
        self.overrides
            .read()
            .expect("override table lock")
            .get(id)
            .cloned()
    }
}

impl Default for CodecRegistry {
    fn default() -> CodecRegistry {
        CodecRegistry::new()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{scalar_codec, STD_INT64};

    #[test]
    fn lru_eviction_keeps_shared_codecs_alive() {
        let registry = CodecRegistry::with_capacity(2);
        let int64 = scalar_codec(&STD_INT64).unwrap();
        registry.store(STD_INT64, int64.clone());
        registry.store(Uuid::from_u128(1), scalar_codec(&STD_INT64).unwrap());
        registry.store(Uuid::from_u128(2), scalar_codec(&STD_INT64).unwrap());
        // the first entry was evicted, but our handle still works
        assert!(registry.lookup(&STD_INT64).is_none());
        assert_eq!(int64.type_id(), STD_INT64);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn override_clears_cache() {
        let registry = CodecRegistry::new();
        registry.store(STD_INT64, scalar_codec(&STD_INT64).unwrap());
        registry.register_override(
            STD_INT64,
            ScalarOverride {
                encode: Box::new(|value| Ok(value.clone())),
                decode: Box::new(Ok),
            },
        );
        assert!(registry.lookup(&STD_INT64).is_none());
        assert!(registry.override_for(&STD_INT64).is_some());
    }
}
