//! Price records and price-id to entity-id translation.
//!
//! Price filters operate on internal price ids. A translation node turns the
//! price-id bitmap of its delegate into entity primary keys by asking every
//! price index discovered under the delegate, in discovery order, to resolve
//! the ids it owns. Resolved records are retained for later price fetches.
//! Ids left unresolved after all indexes were consulted abort the query.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use log::{debug, error};
use roaring::RoaringBitmap;

use crate::bitmap::{Bitmap, PrimaryKey};
use crate::error::{FormulaError, FormulaResult};
use crate::formula::{Formula, FormulaKind, VisitControl};

/// Identifies a price index by price list and currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PriceIndexKey {
    /// Price list name.
    pub price_list: String,
    /// ISO currency code.
    pub currency: String,
}

impl PriceIndexKey {
    /// Creates a key.
    pub fn new(price_list: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            price_list: price_list.into(),
            currency: currency.into(),
        }
    }
}

/// Validity window of a price; open ends are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Validity {
    /// Inclusive start.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive end.
    pub to: Option<DateTime<Utc>>,
}

impl Validity {
    /// Returns true if the moment falls within the window.
    pub fn contains(&self, moment: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| from <= moment) && self.to.map_or(true, |to| moment <= to)
    }
}

/// Single price of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PriceRecord {
    /// Id unique across all price indexes; the value stored in price-id bitmaps.
    pub internal_price_id: PrimaryKey,
    /// External price id.
    pub price_id: PrimaryKey,
    /// Owning entity.
    pub entity_primary_key: PrimaryKey,
    /// Price without tax, in minor currency units.
    pub price_without_tax: i64,
    /// Price with tax, in minor currency units.
    pub price_with_tax: i64,
    /// Optional validity window.
    pub validity: Option<Validity>,
}

impl PriceRecord {
    /// Creates an always-valid record.
    pub fn new(
        internal_price_id: PrimaryKey,
        entity_primary_key: PrimaryKey,
        price_without_tax: i64,
        price_with_tax: i64,
    ) -> Self {
        Self {
            internal_price_id,
            price_id: internal_price_id,
            entity_primary_key,
            price_without_tax,
            price_with_tax,
            validity: None,
        }
    }

    /// Limits the record to a validity window.
    pub fn with_validity(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.validity = Some(Validity { from, to });
        self
    }

    /// Returns true if the price is valid at the moment.
    pub fn is_valid_at(&self, moment: DateTime<Utc>) -> bool {
        self.validity.map_or(true, |v| v.contains(moment))
    }
}

/// Outcome of asking a price index to resolve price ids.
#[derive(Debug, Clone, Default)]
pub struct PriceRecordLookup {
    /// Records the index holds for the requested ids.
    pub records: Vec<PriceRecord>,
    /// Requested ids the index does not know.
    pub unresolved: Bitmap,
}

/// Index of prices for one price list and currency.
pub trait PriceIndex: Send + Sync {
    /// Price list and currency of the index.
    fn key(&self) -> &PriceIndexKey;

    /// Transactional id of the index version.
    fn transactional_id(&self) -> u64;

    /// Resolves price ids into records, returning ids this index does not own.
    fn price_records(&self, price_ids: &Bitmap) -> PriceRecordLookup;
}

/// Order of records held by [`FilteredPriceRecords`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PriceRecordsSortOrder {
    /// No guaranteed order; consumers must sort.
    NotSorted,
    /// Ascending by internal price id.
    InternalPriceId,
    /// Ascending by entity primary key, then internal price id.
    EntityPrimaryKey,
}

/// Price records that matched a price-id bitmap during translation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilteredPriceRecords {
    records: Vec<PriceRecord>,
    sort_order: PriceRecordsSortOrder,
}

impl FilteredPriceRecords {
    /// Wraps records of unknown order.
    pub fn unsorted(records: Vec<PriceRecord>) -> Self {
        Self {
            records,
            sort_order: PriceRecordsSortOrder::NotSorted,
        }
    }

    /// Sorts records by internal price id.
    pub fn sorted_by_price_id(mut records: Vec<PriceRecord>) -> Self {
        records.sort_by_key(|r| r.internal_price_id);
        records.dedup_by_key(|r| r.internal_price_id);
        Self {
            records,
            sort_order: PriceRecordsSortOrder::InternalPriceId,
        }
    }

    /// Merges several record sets, deduplicating by internal price id.
    pub fn merge<I>(sets: I) -> Self
    where
        I: IntoIterator<Item = FilteredPriceRecords>,
    {
        let records: Vec<PriceRecord> = sets.into_iter().flat_map(|s| s.records).collect();
        Self::sorted_by_price_id(records)
    }

    /// The records.
    pub fn records(&self) -> &[PriceRecord] {
        &self.records
    }

    /// Order guarantee of [`records`](Self::records).
    pub fn sort_order(&self) -> PriceRecordsSortOrder {
        self.sort_order
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no record matched.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct owning entities.
    pub fn entity_primary_keys(&self) -> Bitmap {
        self.records.iter().map(|r| r.entity_primary_key).collect()
    }

    /// Records owned by one entity.
    pub fn records_of(&self, entity_primary_key: PrimaryKey) -> Vec<&PriceRecord> {
        match self.sort_order {
            PriceRecordsSortOrder::EntityPrimaryKey => {
                let start = self
                    .records
                    .partition_point(|r| r.entity_primary_key < entity_primary_key);
                self.records[start..]
                    .iter()
                    .take_while(|r| r.entity_primary_key == entity_primary_key)
                    .collect()
            }
            _ => self
                .records
                .iter()
                .filter(|r| r.entity_primary_key == entity_primary_key)
                .collect(),
        }
    }

    /// Re-sorts by entity primary key.
    pub fn sorted_by_entity(&self) -> Self {
        let mut records = self.records.clone();
        records.sort_by_key(|r| (r.entity_primary_key, r.internal_price_id));
        Self {
            records,
            sort_order: PriceRecordsSortOrder::EntityPrimaryKey,
        }
    }

    /// Keeps records valid at the moment, preserving order.
    pub fn valid_at(&self, moment: DateTime<Utc>) -> Self {
        Self {
            records: self
                .records
                .iter()
                .filter(|r| r.is_valid_at(moment))
                .cloned()
                .collect(),
            sort_order: self.sort_order,
        }
    }
}

/// Price index held in memory, keyed by internal price id.
#[derive(Debug, Clone)]
pub struct InMemoryPriceIndex {
    key: PriceIndexKey,
    transactional_id: u64,
    records: BTreeMap<PrimaryKey, PriceRecord>,
}

impl InMemoryPriceIndex {
    /// Creates an empty index.
    pub fn new(key: PriceIndexKey, transactional_id: u64) -> Self {
        Self {
            key,
            transactional_id,
            records: BTreeMap::new(),
        }
    }

    /// Adds records.
    pub fn with_records(mut self, records: impl IntoIterator<Item = PriceRecord>) -> Self {
        for record in records {
            self.records.insert(record.internal_price_id, record);
        }
        self
    }

    /// Internal price ids of records matching the predicate.
    pub fn price_ids_where<F>(&self, predicate: F) -> Bitmap
    where
        F: Fn(&PriceRecord) -> bool,
    {
        self.records
            .values()
            .filter(|r| predicate(r))
            .map(|r| r.internal_price_id)
            .collect()
    }

    /// All internal price ids.
    pub fn price_ids(&self) -> Bitmap {
        self.records.keys().copied().collect()
    }
}

impl PriceIndex for InMemoryPriceIndex {
    fn key(&self) -> &PriceIndexKey {
        &self.key
    }

    fn transactional_id(&self) -> u64 {
        self.transactional_id
    }

    fn price_records(&self, price_ids: &Bitmap) -> PriceRecordLookup {
        let mut records = Vec::new();
        let mut unresolved = RoaringBitmap::new();
        for id in price_ids {
            match self.records.get(&id) {
                Some(record) => records.push(record.clone()),
                None => {
                    unresolved.insert(id);
                }
            }
        }
        PriceRecordLookup {
            records,
            unresolved: Bitmap::from_roaring(unresolved),
        }
    }
}

// ============================================================================
// Translation
// ============================================================================

/// Memoized side results of a translation node.
#[derive(Debug, Default)]
pub struct PriceTranslation {
    records: OnceLock<FilteredPriceRecords>,
    indexes: OnceLock<Vec<PriceIndexKey>>,
}

impl PriceTranslation {
    /// Records retained by the last successful translation.
    pub fn filtered_price_records(&self) -> Option<&FilteredPriceRecords> {
        self.records.get()
    }

    /// Price indexes the translation consulted.
    pub fn involved_indexes(&self) -> Option<&[PriceIndexKey]> {
        self.indexes.get().map(Vec::as_slice)
    }
}

/// Collects price indexes reachable under the node without descending into
/// their own subtrees, deduplicated by key in discovery order.
pub(crate) fn discover_price_indexes(node: &Formula) -> Vec<Arc<dyn PriceIndex>> {
    let mut indexes: Vec<Arc<dyn PriceIndex>> = Vec::new();
    for child in node.children() {
        child.visit(&mut |formula, _| match formula.kind() {
            FormulaKind::PriceIdContainer(index) => {
                if !indexes.iter().any(|known| known.key() == index.key()) {
                    indexes.push(Arc::clone(index));
                }
                VisitControl::SkipChildren
            }
            _ => VisitControl::Continue,
        });
    }
    indexes
}

pub(crate) fn translate(node: &Formula, state: &PriceTranslation) -> FormulaResult<Bitmap> {
    let mut price_id_sets = Vec::with_capacity(node.children().len());
    for child in node.children() {
        price_id_sets.push(child.compute()?);
    }
    let mut remaining = Bitmap::or_all(&price_id_sets);
    let indexes = discover_price_indexes(node);

    let mut entity_ids = RoaringBitmap::new();
    let mut records = Vec::with_capacity(remaining.size());
    for index in &indexes {
        if remaining.is_empty() {
            break;
        }
        let lookup = index.price_records(&remaining);
        debug!(
            "price index {}/{} resolved {} of {} price ids",
            index.key().price_list,
            index.key().currency,
            lookup.records.len(),
            remaining.size()
        );
        entity_ids.extend(lookup.records.iter().map(|r| r.entity_primary_key));
        records.extend(lookup.records);
        remaining = lookup.unresolved;
    }

    if !remaining.is_empty() {
        error!(
            "{} price ids could not be translated to entity ids ({} price indexes consulted)",
            remaining.size(),
            indexes.len()
        );
        return Err(FormulaError::UnresolvedPriceIds {
            price_ids: remaining.to_vec(),
            indexes_consulted: indexes.len(),
        });
    }

    let _ = state
        .indexes
        .set(indexes.iter().map(|i| i.key().clone()).collect());
    let _ = state.records.set(FilteredPriceRecords::sorted_by_price_id(records));
    Ok(Bitmap::from_roaring(entity_ids))
}
