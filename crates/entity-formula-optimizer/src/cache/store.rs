//! LRU formula cache with single-flight computation.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use entity_formula::{FlattenedFormula, Formula, FormulaRef, FormulaResult};
use hashbrown::HashSet;
use log::{debug, trace, warn};
use lru::LruCache;
use parking_lot::{Condvar, Mutex};

use super::config::{CacheStats, FormulaCacheConfig};
use super::supplier::CacheFlightSupplier;
use super::CacheStore;
use crate::error::{OptimizerError, OptimizerResult};

struct CachedPayload {
    payload: Arc<FlattenedFormula>,
    stored_at: Instant,
}

struct CacheState {
    entries: LruCache<u64, CachedPayload>,
    in_flight: HashSet<u64>,
    stats: CacheStats,
}

enum Lookup {
    Fresh(Arc<FlattenedFormula>),
    Stale,
    Missing,
}

/// Formula cache shared by concurrent queries.
///
/// At most one computation per structural hash is live at a time: the first
/// caller computes, later callers with the same hash block until the payload
/// is stored and then read it. Payloads are stored whole, so readers never see
/// a partially written entry.
pub struct LruFormulaCache {
    config: FormulaCacheConfig,
    state: Mutex<CacheState>,
    flight_done: Condvar,
}

impl LruFormulaCache {
    /// Creates a cache; fails on an invalid configuration.
    pub fn new(config: FormulaCacheConfig) -> OptimizerResult<Self> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.max_entries)
            .ok_or_else(|| OptimizerError::invalid_cache_config("max_entries must be positive"))?;
        Ok(Self {
            config,
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                in_flight: HashSet::new(),
                stats: CacheStats::default(),
            }),
            flight_done: Condvar::new(),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FormulaCacheConfig {
        &self.config
    }

    /// Returns true if the formula is cacheable and expensive enough.
    pub fn is_worth_caching(&self, formula: &Formula) -> bool {
        self.config.enabled
            && formula.is_cacheable()
            && formula.estimated_cost() >= self.config.min_complexity_threshold
    }

    /// Returns the payload of `formula`, computing and storing it on a miss.
    ///
    /// Blocks while another thread computes the same hash.
    pub fn get_or_compute(&self, formula: &Formula) -> OptimizerResult<Arc<FlattenedFormula>> {
        if !self.config.enabled {
            return Ok(Arc::new(formula.to_flattened()?));
        }
        let hash = formula.hash();
        let transactional_ids_hash = formula.transactional_ids_hash();

        let mut state = self.state.lock();
        loop {
            let missing = match self.check(&mut state, hash, transactional_ids_hash) {
                Lookup::Fresh(payload) => {
                    state.stats.hits += 1;
                    return Ok(payload);
                }
                Lookup::Missing => true,
                Lookup::Stale => false,
            };
            if state.in_flight.insert(hash) {
                if missing {
                    state.stats.misses += 1;
                }
                break;
            }
            trace!("waiting for in-flight computation of formula {:016x}", hash);
            self.flight_done.wait(&mut state);
        }
        drop(state);

        let flight = Flight { cache: self, hash };
        debug!("computing formula {:016x} for the cache", hash);
        let payload = Arc::new(formula.to_flattened()?);
        {
            let mut state = self.state.lock();
            state.entries.put(
                hash,
                CachedPayload {
                    payload: Arc::clone(&payload),
                    stored_at: Instant::now(),
                },
            );
            state.stats.computations += 1;
        }
        drop(flight);
        Ok(payload)
    }

    /// Substitutes every expensive cacheable subtree of `root`.
    ///
    /// Hits become `Flattened` nodes, misses become `Deferred` nodes computing
    /// through [`get_or_compute`](Self::get_or_compute). Substituted nodes keep
    /// the structural hash and estimates of the subtree they replace, and the
    /// subtree itself as their [`origin`](Formula::origin).
    pub fn register(self: &Arc<Self>, root: &FormulaRef) -> FormulaResult<FormulaRef> {
        if !self.config.enabled {
            return Ok(Arc::clone(root));
        }
        self.substitute(root)
    }

    fn substitute(self: &Arc<Self>, node: &FormulaRef) -> FormulaResult<FormulaRef> {
        if self.is_worth_caching(node) {
            let hit = {
                let mut state = self.state.lock();
                match self.check(&mut state, node.hash(), node.transactional_ids_hash()) {
                    Lookup::Fresh(payload) => {
                        state.stats.hits += 1;
                        Some(payload)
                    }
                    Lookup::Stale | Lookup::Missing => None,
                }
            };
            let replacement = match hit {
                Some(payload) => {
                    trace!("formula {:016x} served from the cache", node.hash());
                    Formula::flattened(FlattenedFormula::clone(&payload))
                }
                None => {
                    debug!("formula {:016x} deferred to the cache", node.hash());
                    Formula::deferred(Arc::new(CacheFlightSupplier::new(Arc::clone(self), Arc::clone(node))))
                }
            };
            return Formula::substitute(&replacement, Arc::clone(node));
        }
        if node.children().is_empty() {
            return Ok(Arc::clone(node));
        }

        let mut changed = false;
        let mut children = Vec::with_capacity(node.children().len());
        for child in node.children() {
            let substituted = self.substitute(child)?;
            changed |= !Arc::ptr_eq(&substituted, child);
            children.push(substituted);
        }
        if changed {
            node.clone_with_children(children)
        } else {
            Ok(Arc::clone(node))
        }
    }

    /// Looks up `hash`, evicting the entry if it is stale.
    fn check(&self, state: &mut CacheState, hash: u64, transactional_ids_hash: u64) -> Lookup {
        let fresh = match state.entries.get(&hash) {
            None => return Lookup::Missing,
            Some(cached) if self.is_expired(cached) || !cached.payload.is_valid_for(transactional_ids_hash) => None,
            Some(cached) => Some(Arc::clone(&cached.payload)),
        };
        match fresh {
            Some(payload) => Lookup::Fresh(payload),
            None => {
                state.entries.pop(&hash);
                state.stats.stale += 1;
                warn!("cached payload of formula {:016x} is stale, recomputing", hash);
                Lookup::Stale
            }
        }
    }

    fn is_expired(&self, cached: &CachedPayload) -> bool {
        self.config
            .ttl
            .is_some_and(|ttl| cached.stored_at.elapsed() >= ttl)
    }

    /// Removes the payload of `hash`; returns true if one was stored.
    pub fn invalidate(&self, hash: u64) -> bool {
        self.state.lock().entries.pop(&hash).is_some()
    }

    /// Removes every payload.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Returns the number of stored payloads.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            ..state.stats.clone()
        }
    }

    /// Resets statistics.
    pub fn reset_stats(&self) {
        self.state.lock().stats = CacheStats::default();
    }
}

impl CacheStore for LruFormulaCache {
    fn lookup(&self, hash: u64) -> Option<Arc<FlattenedFormula>> {
        let mut state = self.state.lock();
        match state.entries.get(&hash) {
            Some(cached) if !self.is_expired(cached) => Some(Arc::clone(&cached.payload)),
            _ => None,
        }
    }

    fn store(&self, hash: u64, payload: Arc<FlattenedFormula>) {
        self.state.lock().entries.put(
            hash,
            CachedPayload {
                payload,
                stored_at: Instant::now(),
            },
        );
    }
}

impl std::fmt::Debug for LruFormulaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruFormulaCache")
            .field("config", &self.config)
            .field("entries", &self.len())
            .finish()
    }
}

/// Releases the in-flight mark on every exit path and wakes the waiters.
struct Flight<'a> {
    cache: &'a LruFormulaCache,
    hash: u64,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.cache.state.lock().in_flight.remove(&self.hash);
        self.cache.flight_done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_formula::{Bitmap, BitmapSupplier, FormulaKind, LazyBitmap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config() -> FormulaCacheConfig {
        FormulaCacheConfig::default().with_min_complexity_threshold(0)
    }

    fn counted(ids: &[u32], counter: &Arc<AtomicUsize>) -> FormulaRef {
        let counter = Arc::clone(counter);
        let bitmap: Bitmap = ids.iter().copied().collect();
        let params = format!("{:?}", ids);
        Formula::deferred(Arc::new(LazyBitmap::new("index", &params, ids.len() as u64, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(bitmap.clone())
        })))
    }

    fn expensive(counter: &Arc<AtomicUsize>) -> FormulaRef {
        Formula::and(vec![counted(&[1, 2, 3], counter), counted(&[2, 3, 4], counter)])
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = LruFormulaCache::new(config()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let first = cache.get_or_compute(&expensive(&counter)).unwrap();
        let second = cache.get_or_compute(&expensive(&counter)).unwrap();
        assert_eq!(first.bitmap().to_vec(), vec![2, 3]);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_register_defers_then_flattens() {
        let cache = Arc::new(LruFormulaCache::new(config()).unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let root = Formula::or(vec![expensive(&counter), Formula::constant(Bitmap::from_iter([9]))]);

        let registered = cache.register(&root).unwrap();
        assert_eq!(registered.hash(), root.hash());
        assert!(matches!(registered.kind(), FormulaKind::Deferred(_)));
        assert_eq!(registered.compute().unwrap().to_vec(), vec![2, 3, 9]);

        let again = cache.register(&root).unwrap();
        assert!(matches!(again.kind(), FormulaKind::Flattened(_)));
        assert_eq!(again.compute().unwrap().to_vec(), vec![2, 3, 9]);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cheap_subtrees_are_not_registered() {
        let cache = Arc::new(
            LruFormulaCache::new(FormulaCacheConfig::default().with_min_complexity_threshold(u64::MAX)).unwrap(),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        let root = expensive(&counter);
        assert!(Arc::ptr_eq(&cache.register(&root).unwrap(), &root));
    }

    #[test]
    fn test_expired_payload_is_recomputed() {
        let cache = LruFormulaCache::new(config().with_ttl(Duration::from_millis(1))).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        cache.get_or_compute(&expensive(&counter)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        cache.get_or_compute(&expensive(&counter)).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(cache.stats().stale, 1);
        assert_eq!(cache.stats().computations, 2);
    }

    #[test]
    fn test_disabled_cache_computes_directly() {
        let cache = Arc::new(LruFormulaCache::new(FormulaCacheConfig::disabled()).unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let root = expensive(&counter);
        assert!(Arc::ptr_eq(&cache.register(&root).unwrap(), &root));
        cache.get_or_compute(&root).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_and_lookup() {
        let cache = LruFormulaCache::new(config().with_max_entries(1)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let payload = Arc::new(expensive(&counter).to_flattened().unwrap());
        cache.store(1, Arc::clone(&payload));
        cache.store(2, payload);
        assert!(cache.lookup(1).is_none());
        assert!(cache.lookup(2).is_some());
        assert!(cache.invalidate(2));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_supplier_reports_subtree_estimates() {
        let cache = Arc::new(LruFormulaCache::new(config()).unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let root = expensive(&counter);
        let supplier = CacheFlightSupplier::new(Arc::clone(&cache), Arc::clone(&root));
        assert_eq!(supplier.hash(), root.hash());
        assert_eq!(supplier.estimated_cost(), root.estimated_cost());
        assert_eq!(supplier.estimated_cardinality(), root.estimated_cardinality());
    }
}
