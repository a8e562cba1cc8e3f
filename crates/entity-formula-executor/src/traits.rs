//! Collaborator traits for query execution.
//!
//! The executor never owns indexes. It reads them through the traits below,
//! which the embedding storage layer implements over its own structures.
//!
//! # Example: an in-memory hierarchy
//!
//! ```rust
//! use entity_formula_executor::{HierarchyIndex, InMemoryHierarchyIndex};
//!
//! let index = InMemoryHierarchyIndex::builder()
//!     .add_node(1, None)
//!     .add_node(2, Some(1))
//!     .add_node(3, Some(1))
//!     .build();
//!
//! assert_eq!(index.root_nodes(), vec![1]);
//! assert_eq!(index.children_of(1), vec![2, 3]);
//! assert_eq!(index.level_of(3), Some(2));
//! ```

use std::sync::Arc;

use entity_formula::{Bitmap, PrimaryKey};
use hashbrown::HashMap;

// =============================================================================
// Hierarchy index
// =============================================================================

/// Parent/child adjacency over the primary keys of one hierarchical entity type.
pub trait HierarchyIndex: Send + Sync {
    /// Returns the root nodes in hierarchy order.
    fn root_nodes(&self) -> Vec<PrimaryKey>;

    /// Returns the direct children of a node in hierarchy order.
    fn children_of(&self, node: PrimaryKey) -> Vec<PrimaryKey>;

    /// Returns the parent of a node, or None for roots and unknown nodes.
    fn parent_of(&self, node: PrimaryKey) -> Option<PrimaryKey>;

    /// Returns true if the node is part of the hierarchy.
    fn contains(&self, node: PrimaryKey) -> bool;

    /// Returns the absolute level of a node (roots are level 1).
    fn level_of(&self, node: PrimaryKey) -> Option<usize> {
        if !self.contains(node) {
            return None;
        }
        let mut level = 1;
        let mut current = node;
        while let Some(parent) = self.parent_of(current) {
            level += 1;
            current = parent;
        }
        Some(level)
    }
}

/// Hierarchy index backed by hash maps.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHierarchyIndex {
    roots: Vec<PrimaryKey>,
    parents: HashMap<PrimaryKey, PrimaryKey>,
    children: HashMap<PrimaryKey, Vec<PrimaryKey>>,
}

impl InMemoryHierarchyIndex {
    /// Creates a new builder.
    pub fn builder() -> InMemoryHierarchyIndexBuilder {
        InMemoryHierarchyIndexBuilder::default()
    }

    /// Number of nodes in the hierarchy.
    pub fn len(&self) -> usize {
        self.roots.len() + self.parents.len()
    }

    /// Returns true if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HierarchyIndex for InMemoryHierarchyIndex {
    fn root_nodes(&self) -> Vec<PrimaryKey> {
        self.roots.clone()
    }

    fn children_of(&self, node: PrimaryKey) -> Vec<PrimaryKey> {
        self.children.get(&node).cloned().unwrap_or_default()
    }

    fn parent_of(&self, node: PrimaryKey) -> Option<PrimaryKey> {
        self.parents.get(&node).copied()
    }

    fn contains(&self, node: PrimaryKey) -> bool {
        self.parents.contains_key(&node) || self.roots.contains(&node)
    }
}

/// Builder for [`InMemoryHierarchyIndex`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryHierarchyIndexBuilder {
    nodes: Vec<(PrimaryKey, Option<PrimaryKey>)>,
}

impl InMemoryHierarchyIndexBuilder {
    /// Adds a node under an optional parent.
    pub fn add_node(mut self, node: PrimaryKey, parent: Option<PrimaryKey>) -> Self {
        self.nodes.push((node, parent));
        self
    }

    /// Builds the index; siblings are ordered by primary key.
    pub fn build(self) -> InMemoryHierarchyIndex {
        let mut index = InMemoryHierarchyIndex::default();
        for (node, parent) in self.nodes {
            match parent {
                Some(parent) => {
                    index.parents.insert(node, parent);
                    index.children.entry(parent).or_default().push(node);
                }
                None => index.roots.push(node),
            }
        }
        index.roots.sort_unstable();
        index.roots.dedup();
        for children in index.children.values_mut() {
            children.sort_unstable();
            children.dedup();
        }
        index
    }
}

// =============================================================================
// Sorted records
// =============================================================================

/// Pre-sorted index of one sortable attribute.
///
/// `all_records` holds every indexed primary key. `record_positions[i]` is the
/// position in the sorted order of the i-th key of `all_records` (in ascending
/// key order) and `sorted_record_ids` lists the keys in sorted order.
pub trait SortedRecordsProvider: Send + Sync {
    /// All primary keys covered by the index.
    fn all_records(&self) -> &Bitmap;

    /// Position of each record (indexed like `all_records`) in the sorted order.
    fn record_positions(&self) -> &[usize];

    /// Primary keys in sorted order.
    fn sorted_record_ids(&self) -> &[PrimaryKey];
}

/// Sorted-records provider created from an already ordered key list.
#[derive(Debug, Clone)]
pub struct InMemorySortedRecords {
    all_records: Bitmap,
    record_positions: Vec<usize>,
    sorted_record_ids: Vec<PrimaryKey>,
}

impl InMemorySortedRecords {
    /// Creates the provider from keys listed in their sorted order.
    ///
    /// Duplicate keys keep their first position.
    pub fn from_sorted(sorted: Vec<PrimaryKey>) -> Self {
        let mut sorted_record_ids = Vec::with_capacity(sorted.len());
        let mut seen = HashMap::with_capacity(sorted.len());
        for pk in sorted {
            if !seen.contains_key(&pk) {
                seen.insert(pk, sorted_record_ids.len());
                sorted_record_ids.push(pk);
            }
        }
        let all_records: Bitmap = sorted_record_ids.iter().copied().collect();
        let record_positions = all_records.iter().filter_map(|pk| seen.get(&pk).copied()).collect();
        Self {
            all_records,
            record_positions,
            sorted_record_ids,
        }
    }
}

impl SortedRecordsProvider for InMemorySortedRecords {
    fn all_records(&self) -> &Bitmap {
        &self.all_records
    }

    fn record_positions(&self) -> &[usize] {
        &self.record_positions
    }

    fn sorted_record_ids(&self) -> &[PrimaryKey] {
        &self.sorted_record_ids
    }
}

// =============================================================================
// Index provider
// =============================================================================

/// Storage-side indexes consulted during execution.
pub trait IndexProvider: Send + Sync {
    /// Returns the hierarchy index of an entity type, or None if it is not hierarchical.
    fn hierarchy_index(&self, entity_type: &str) -> Option<Arc<dyn HierarchyIndex>>;

    /// Returns the primary keys an entity references through `reference_name`.
    fn referenced_ids(&self, entity_primary_key: PrimaryKey, reference_name: &str) -> Vec<PrimaryKey>;

    /// Returns the entities referencing `referenced_primary_key` through `reference_name`.
    fn referencing_entities(&self, reference_name: &str, referenced_primary_key: PrimaryKey) -> Bitmap;

    /// Returns the entity type a reference points to.
    fn reference_target_type(&self, entity_type: &str, reference_name: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> InMemoryHierarchyIndex {
        InMemoryHierarchyIndex::builder()
            .add_node(10, None)
            .add_node(12, Some(10))
            .add_node(11, Some(10))
            .add_node(13, Some(12))
            .add_node(20, None)
            .build()
    }

    #[test]
    fn test_hierarchy_adjacency() {
        let index = tree();
        assert_eq!(index.root_nodes(), vec![10, 20]);
        assert_eq!(index.children_of(10), vec![11, 12]);
        assert_eq!(index.parent_of(13), Some(12));
        assert_eq!(index.parent_of(10), None);
        assert!(index.children_of(99).is_empty());
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_hierarchy_levels() {
        let index = tree();
        assert_eq!(index.level_of(10), Some(1));
        assert_eq!(index.level_of(13), Some(3));
        assert_eq!(index.level_of(99), None);
    }

    #[test]
    fn test_sorted_records_positions() {
        let records = InMemorySortedRecords::from_sorted(vec![30, 10, 20, 10]);
        assert_eq!(records.all_records().to_vec(), vec![10, 20, 30]);
        assert_eq!(records.sorted_record_ids(), &[30, 10, 20]);
        assert_eq!(records.record_positions(), &[1, 2, 0]);
    }
}
