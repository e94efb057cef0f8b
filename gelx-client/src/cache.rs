//! The per-client cache of prepared query shapes.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use gelx_protocol::codec::Codec;
use gelx_protocol::common::{Capabilities, Cardinality, IoFormat};

pub const DEFAULT_QUERY_CACHE_SIZE: usize = 1000;

/// The key identifying one logically equivalent query preparation.
///
/// Two calls with equal fingerprints share cardinality and codecs; the
/// session state and argument values deliberately do not participate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub query: String,
    pub output_format: IoFormat,
    pub implicit_limit: Option<u64>,
    pub inject_typenames: bool,
    pub inject_typeids: bool,
    pub expect_one: bool,
}

/// What a Parse (or corrected Execute) taught us about a query.
#[derive(Clone)]
pub struct CachedQuery {
    pub cardinality: Cardinality,
    pub in_codec: Arc<dyn Codec>,
    pub out_codec: Arc<dyn Codec>,
    pub capabilities: Capabilities,
}

pub struct QueryCache {
    entries: LruCache<Fingerprint, CachedQuery>,
}

impl QueryCache {
    pub fn new() -> QueryCache {
        QueryCache::with_capacity(DEFAULT_QUERY_CACHE_SIZE)
    }
    pub fn with_capacity(capacity: usize) -> QueryCache {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        QueryCache {
            entries: LruCache::new(capacity),
        }
    }
    pub fn get(&mut self, fingerprint: &Fingerprint) -> Option<CachedQuery> {
        self.entries.get(fingerprint).cloned()
    }
    pub fn put(&mut self, fingerprint: Fingerprint, entry: CachedQuery) {
        self.entries.put(fingerprint, entry);
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for QueryCache {
    fn default() -> QueryCache {
        QueryCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gelx_protocol::codec::{scalar_codec, STD_INT64, STD_STR};

    fn fingerprint(query: &str, expect_one: bool) -> Fingerprint {
        Fingerprint {
            query: query.into(),
            output_format: IoFormat::Binary,
            implicit_limit: None,
            inject_typenames: false,
            inject_typeids: false,
            expect_one,
        }
    }

    fn entry() -> CachedQuery {
        CachedQuery {
            cardinality: Cardinality::Many,
            in_codec: scalar_codec(&STD_STR).unwrap(),
            out_codec: scalar_codec(&STD_INT64).unwrap(),
            capabilities: Capabilities::empty(),
        }
    }

    #[test]
    fn equal_fingerprints_share_entries() {
        let mut cache = QueryCache::new();
        cache.put(fingerprint("select 1", false), entry());
        let hit = cache.get(&fingerprint("select 1", false)).unwrap();
        assert!(Arc::ptr_eq(
            &hit.out_codec,
            &cache.get(&fingerprint("select 1", false)).unwrap().out_codec
        ));
        assert!(cache.get(&fingerprint("select 1", true)).is_none());
        assert!(cache.get(&fingerprint("select 2", false)).is_none());
    }

    #[test]
    fn lru_evicts_oldest() {
        let mut cache = QueryCache::with_capacity(2);
        cache.put(fingerprint("a", false), entry());
        cache.put(fingerprint("b", false), entry());
        cache.put(fingerprint("c", false), entry());
        assert!(cache.get(&fingerprint("a", false)).is_none());
        assert!(cache.get(&fingerprint("b", false)).is_some());
        assert!(cache.get(&fingerprint("c", false)).is_some());
    }
}
