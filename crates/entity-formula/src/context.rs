//! Per-query execution context.
//!
//! The context is created once per query and bound into the formula tree by
//! [`Formula::initialize`](crate::Formula::initialize). It owns:
//!
//! - the prefetched entity bodies (present only when the planner decided to
//!   materialize a small candidate set up front),
//! - entity translation between primary keys and decorated entities,
//! - access to the scratch buffer pool shared by sorters,
//! - the referenced entity temporarily bound by reference-aware comparators.
//!
//! # Example
//!
//! ```rust
//! use entity_formula::{QueryExecutionContext, SealedEntity};
//!
//! let ctx = QueryExecutionContext::builder("product")
//!     .with_prefetched_entities(vec![SealedEntity::new("product", 7)])
//!     .build();
//!
//! assert!(ctx.entity(7).is_some());
//! {
//!     let mut buffer = ctx.borrow_buffer();
//!     buffer.push(7);
//! }
//! assert_eq!(ctx.buffer_pool().outstanding(), 0);
//! ```

use std::borrow::Cow;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use log::trace;
use parking_lot::Mutex;

use crate::bitmap::{Bitmap, PrimaryKey};
use crate::entity::SealedEntity;

/// Default capacity of pooled scratch buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 512;

/// Loads entity bodies by primary key.
pub trait EntityFetcher: Send + Sync {
    /// Fetches the entities of the given type; unknown keys are skipped.
    fn fetch_entities(&self, entity_type: &str, primary_keys: &[PrimaryKey]) -> Vec<SealedEntity>;
}

// ============================================================================
// Buffer pool
// ============================================================================

/// Pool of scratch integer buffers shared by concurrent queries.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<PrimaryKey>>>,
    buffer_size: usize,
    max_pooled: usize,
    outstanding: AtomicUsize,
    allocated: AtomicUsize,
}

impl BufferPool {
    /// Creates a pool handing out buffers with the given initial capacity.
    pub fn new(buffer_size: usize) -> Self {
        Self::with_limit(buffer_size, 64)
    }

    /// Creates a pool keeping at most `max_pooled` idle buffers.
    pub fn with_limit(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            buffer_size: buffer_size.max(1),
            max_pooled,
            outstanding: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Borrows an empty buffer; it returns to the pool when the guard drops.
    pub fn borrow(&self) -> BufferGuard<'_> {
        let pooled = self.buffers.lock().pop();
        let buffer = match pooled {
            Some(buffer) => buffer,
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.buffer_size)
            }
        };
        let outstanding = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("borrowed scratch buffer, {} outstanding", outstanding);
        BufferGuard {
            pool: self,
            buffer,
        }
    }

    fn give_back(&self, mut buffer: Vec<PrimaryKey>) {
        buffer.clear();
        {
            let mut buffers = self.buffers.lock();
            if buffers.len() < self.max_pooled {
                buffers.push(buffer);
            }
        }
        let outstanding = self.outstanding.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!("returned scratch buffer, {} outstanding", outstanding);
    }

    /// Number of buffers currently borrowed.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Number of idle buffers held by the pool.
    pub fn pooled(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Total number of buffers ever allocated by the pool.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("outstanding", &self.outstanding())
            .field("pooled", &self.pooled())
            .finish()
    }
}

/// Scratch buffer borrowed from a [`BufferPool`].
pub struct BufferGuard<'a> {
    pool: &'a BufferPool,
    buffer: Vec<PrimaryKey>,
}

impl Deref for BufferGuard<'_> {
    type Target = Vec<PrimaryKey>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for BufferGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for BufferGuard<'_> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buffer));
    }
}

// ============================================================================
// Execution context
// ============================================================================

struct PrefetchedEntities {
    entities: Vec<SealedEntity>,
    positions: HashMap<PrimaryKey, usize>,
}

/// Shared state of one query evaluation.
pub struct QueryExecutionContext {
    entity_type: String,
    prefetched: Option<PrefetchedEntities>,
    fetcher: Option<Arc<dyn EntityFetcher>>,
    buffer_pool: Arc<BufferPool>,
    bound_references: Mutex<HashMap<String, PrimaryKey>>,
}

impl QueryExecutionContext {
    /// Creates a builder for a query over the given entity type.
    pub fn builder(entity_type: impl Into<String>) -> QueryExecutionContextBuilder {
        QueryExecutionContextBuilder {
            entity_type: entity_type.into(),
            prefetched: None,
            fetcher: None,
            buffer_pool: None,
        }
    }

    /// Entity type the query targets.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Prefetched entity bodies, if the planner decided to materialize them.
    pub fn prefetched_entities(&self) -> Option<&[SealedEntity]> {
        self.prefetched.as_ref().map(|p| p.entities.as_slice())
    }

    /// Primary keys of the prefetched entities.
    pub fn prefetched_primary_keys(&self) -> Option<Bitmap> {
        self.prefetched
            .as_ref()
            .map(|p| p.entities.iter().map(|e| e.primary_key).collect())
    }

    /// Translates a primary key into its decorated entity.
    ///
    /// Prefetched bodies are used first; otherwise the entity fetcher is asked.
    pub fn entity(&self, primary_key: PrimaryKey) -> Option<Cow<'_, SealedEntity>> {
        if let Some(entity) = self.prefetched_entity(primary_key) {
            return Some(Cow::Borrowed(entity));
        }
        let fetcher = self.fetcher.as_ref()?;
        fetcher
            .fetch_entities(&self.entity_type, &[primary_key])
            .into_iter()
            .next()
            .map(Cow::Owned)
    }

    /// Translates many primary keys at once, preserving input order.
    ///
    /// Keys that cannot be translated are left out of the result.
    pub fn entities(&self, primary_keys: &[PrimaryKey]) -> Vec<Cow<'_, SealedEntity>> {
        let mut missing = Vec::new();
        for &pk in primary_keys {
            if self.prefetched_entity(pk).is_none() {
                missing.push(pk);
            }
        }
        let mut fetched: HashMap<PrimaryKey, SealedEntity> = match (&self.fetcher, missing.is_empty()) {
            (Some(fetcher), false) => fetcher
                .fetch_entities(&self.entity_type, &missing)
                .into_iter()
                .map(|e| (e.primary_key, e))
                .collect(),
            _ => HashMap::new(),
        };
        primary_keys
            .iter()
            .filter_map(|&pk| match self.prefetched_entity(pk) {
                Some(entity) => Some(Cow::Borrowed(entity)),
                None => fetched.remove(&pk).map(Cow::Owned),
            })
            .collect()
    }

    /// Translates an entity back to its primary key.
    pub fn primary_key_of(&self, entity: &SealedEntity) -> PrimaryKey {
        entity.primary_key
    }

    /// Borrows a scratch buffer from the shared pool.
    pub fn borrow_buffer(&self) -> BufferGuard<'_> {
        self.buffer_pool.borrow()
    }

    /// The shared buffer pool.
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    /// Binds a referenced entity for the named reference until the guard drops.
    pub fn bind_referenced_entity(&self, reference_name: &str, primary_key: PrimaryKey) -> ReferenceBinding<'_> {
        let previous = self
            .bound_references
            .lock()
            .insert(reference_name.to_string(), primary_key);
        ReferenceBinding {
            ctx: self,
            reference_name: reference_name.to_string(),
            previous,
        }
    }

    /// Referenced entity currently bound for the named reference.
    pub fn bound_referenced_entity(&self, reference_name: &str) -> Option<PrimaryKey> {
        self.bound_references.lock().get(reference_name).copied()
    }

    fn prefetched_entity(&self, primary_key: PrimaryKey) -> Option<&SealedEntity> {
        let prefetched = self.prefetched.as_ref()?;
        prefetched
            .positions
            .get(&primary_key)
            .map(|&idx| &prefetched.entities[idx])
    }
}

impl fmt::Debug for QueryExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExecutionContext")
            .field("entity_type", &self.entity_type)
            .field(
                "prefetched",
                &self.prefetched.as_ref().map(|p| p.entities.len()),
            )
            .field("has_fetcher", &self.fetcher.is_some())
            .field("buffer_pool", &self.buffer_pool)
            .finish()
    }
}

/// Builder for [`QueryExecutionContext`].
pub struct QueryExecutionContextBuilder {
    entity_type: String,
    prefetched: Option<Vec<SealedEntity>>,
    fetcher: Option<Arc<dyn EntityFetcher>>,
    buffer_pool: Option<Arc<BufferPool>>,
}

impl QueryExecutionContextBuilder {
    /// Supplies prefetched entity bodies.
    pub fn with_prefetched_entities(mut self, entities: Vec<SealedEntity>) -> Self {
        self.prefetched = Some(entities);
        self
    }

    /// Supplies the fetcher used for entity translation.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn EntityFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Shares an existing buffer pool.
    pub fn with_buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.buffer_pool = Some(pool);
        self
    }

    /// Builds the context.
    pub fn build(self) -> QueryExecutionContext {
        let prefetched = self.prefetched.map(|entities| {
            let positions = entities
                .iter()
                .enumerate()
                .map(|(idx, e)| (e.primary_key, idx))
                .collect();
            PrefetchedEntities { entities, positions }
        });
        QueryExecutionContext {
            entity_type: self.entity_type,
            prefetched,
            fetcher: self.fetcher,
            buffer_pool: self.buffer_pool.unwrap_or_default(),
            bound_references: Mutex::new(HashMap::new()),
        }
    }
}

/// Guard restoring the previous reference binding when dropped.
pub struct ReferenceBinding<'a> {
    ctx: &'a QueryExecutionContext,
    reference_name: String,
    previous: Option<PrimaryKey>,
}

impl Drop for ReferenceBinding<'_> {
    fn drop(&mut self) {
        let mut bound = self.ctx.bound_references.lock();
        match self.previous {
            Some(pk) => {
                bound.insert(self.reference_name.clone(), pk);
            }
            None => {
                bound.remove(&self.reference_name);
            }
        }
    }
}
