//! Comparator-based sorting over decorated entities.

use std::cmp::Ordering;

use entity_formula::{AttributeValue, Bitmap, PrimaryKey, QueryExecutionContext, SealedEntity};

use super::{SortOutcome, Sorter};
use crate::error::QueryResult;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Smallest key first.
    #[default]
    Ascending,
    /// Largest key first.
    Descending,
}

/// Extracts the sort key of an entity.
pub trait EntityComparator: Send + Sync {
    /// Sort key of the entity, or None if the entity cannot be placed.
    fn key(&self, entity: &SealedEntity, exec: &QueryExecutionContext) -> Option<AttributeValue>;

    /// Direction of the ordering.
    fn direction(&self) -> SortDirection;
}

/// Orders by an attribute of the entity itself.
#[derive(Debug, Clone)]
pub struct AttributeComparator {
    attribute: String,
    direction: SortDirection,
}

impl AttributeComparator {
    /// Creates the comparator.
    pub fn new(attribute: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            attribute: attribute.into(),
            direction,
        }
    }
}

impl EntityComparator for AttributeComparator {
    fn key(&self, entity: &SealedEntity, _: &QueryExecutionContext) -> Option<AttributeValue> {
        entity.attribute(&self.attribute).cloned()
    }

    fn direction(&self) -> SortDirection {
        self.direction
    }
}

/// Orders by an attribute stored on a reference.
///
/// When a referenced entity is bound in the execution context, the attribute
/// of that particular reference is used. Otherwise the smallest value across
/// all references of the name is taken.
#[derive(Debug, Clone)]
pub struct ReferenceAttributeComparator {
    reference: String,
    attribute: String,
    direction: SortDirection,
}

impl ReferenceAttributeComparator {
    /// Creates the comparator.
    pub fn new(reference: impl Into<String>, attribute: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            reference: reference.into(),
            attribute: attribute.into(),
            direction,
        }
    }

    /// Name of the reference the attribute lives on.
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl EntityComparator for ReferenceAttributeComparator {
    fn key(&self, entity: &SealedEntity, exec: &QueryExecutionContext) -> Option<AttributeValue> {
        if let Some(bound) = exec.bound_referenced_entity(&self.reference) {
            return entity
                .reference(&self.reference, bound)
                .and_then(|r| r.attributes.get(&self.attribute))
                .cloned();
        }
        entity
            .references_named(&self.reference)
            .filter_map(|r| r.attributes.get(&self.attribute))
            .fold(None::<&AttributeValue>, |min, value| match min {
                Some(current) if current.compare(value) != Some(Ordering::Greater) => Some(current),
                _ => Some(value),
            })
            .cloned()
    }

    fn direction(&self) -> SortDirection {
        self.direction
    }
}

/// Sorter materializing entities and ordering them by a comparator.
///
/// Entities without a key (or that cannot be fetched) are left in the residue.
/// Ties are broken by primary key.
pub struct EntityComparatorSorter {
    comparator: Box<dyn EntityComparator>,
    binding: Option<(String, PrimaryKey)>,
}

impl EntityComparatorSorter {
    /// Creates the sorter.
    pub fn new(comparator: impl EntityComparator + 'static) -> Self {
        Self {
            comparator: Box::new(comparator),
            binding: None,
        }
    }

    /// Binds a referenced entity for the duration of every sort.
    pub fn bound_to(mut self, reference: impl Into<String>, referenced_primary_key: PrimaryKey) -> Self {
        self.binding = Some((reference.into(), referenced_primary_key));
        self
    }
}

impl std::fmt::Debug for EntityComparatorSorter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityComparatorSorter")
            .field("direction", &self.comparator.direction())
            .field("binding", &self.binding)
            .finish()
    }
}

impl Sorter for EntityComparatorSorter {
    fn name(&self) -> &'static str {
        "entity_comparator"
    }

    fn sort(&self, exec: &QueryExecutionContext, candidates: &Bitmap, limit: usize) -> QueryResult<SortOutcome> {
        let _binding = self
            .binding
            .as_ref()
            .map(|(reference, pk)| exec.bind_referenced_entity(reference, *pk));

        let entities = exec.entities(&candidates.to_vec());
        let mut keyed: Vec<(AttributeValue, PrimaryKey)> = entities
            .iter()
            .filter_map(|entity| {
                self.comparator
                    .key(entity, exec)
                    .map(|key| (key, exec.primary_key_of(entity)))
            })
            .collect();

        let direction = self.comparator.direction();
        keyed.sort_by(|(a, a_pk), (b, b_pk)| {
            let by_key = a.compare(b).unwrap_or(Ordering::Equal);
            let by_key = match direction {
                SortDirection::Ascending => by_key,
                SortDirection::Descending => by_key.reverse(),
            };
            by_key.then(a_pk.cmp(b_pk))
        });

        let placed: Bitmap = keyed.iter().map(|(_, pk)| *pk).collect();
        Ok(SortOutcome {
            sorted: keyed.into_iter().take(limit).map(|(_, pk)| pk).collect(),
            residue: candidates.andnot(&placed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entities() -> Vec<SealedEntity> {
        vec![
            SealedEntity::new("product", 1)
                .with_attribute("name", "pear")
                .with_reference("stock", 100, [("quantity", AttributeValue::Int(7))])
                .with_reference("stock", 101, [("quantity", AttributeValue::Int(2))]),
            SealedEntity::new("product", 2)
                .with_attribute("name", "apple")
                .with_reference("stock", 100, [("quantity", AttributeValue::Int(3))]),
            SealedEntity::new("product", 3).with_reference("stock", 101, [("quantity", AttributeValue::Int(9))]),
        ]
    }

    fn exec() -> QueryExecutionContext {
        QueryExecutionContext::builder("product")
            .with_prefetched_entities(entities())
            .build()
    }

    #[test]
    fn test_attribute_sort_leaves_residue() {
        let sorter = EntityComparatorSorter::new(AttributeComparator::new("name", SortDirection::Ascending));
        let outcome = sorter.sort(&exec(), &Bitmap::from_iter([1, 2, 3]), 10).unwrap();
        assert_eq!(outcome.sorted, vec![2, 1]);
        assert_eq!(outcome.residue.to_vec(), vec![3]);
    }

    #[test]
    fn test_descending_sort_respects_limit() {
        let sorter = EntityComparatorSorter::new(AttributeComparator::new("name", SortDirection::Descending));
        let outcome = sorter.sort(&exec(), &Bitmap::from_iter([1, 2, 3]), 1).unwrap();
        assert_eq!(outcome.sorted, vec![1]);
    }

    #[test]
    fn test_reference_attribute_without_binding_uses_minimum() {
        let sorter = EntityComparatorSorter::new(ReferenceAttributeComparator::new(
            "stock",
            "quantity",
            SortDirection::Ascending,
        ));
        let outcome = sorter.sort(&exec(), &Bitmap::from_iter([1, 2, 3]), 10).unwrap();
        assert_eq!(outcome.sorted, vec![1, 2, 3]);
    }

    #[test]
    fn test_reference_attribute_with_binding() {
        let exec = exec();
        let sorter = EntityComparatorSorter::new(ReferenceAttributeComparator::new(
            "stock",
            "quantity",
            SortDirection::Ascending,
        ))
        .bound_to("stock", 100);
        let outcome = sorter.sort(&exec, &Bitmap::from_iter([1, 2, 3]), 10).unwrap();
        assert_eq!(outcome.sorted, vec![2, 1]);
        assert_eq!(outcome.residue.to_vec(), vec![3]);
        assert_eq!(exec.bound_referenced_entity("stock"), None);
    }
}
