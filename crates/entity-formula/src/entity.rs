//! Decorated entity bodies used by prefetch-based filtering and sorting.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::bitmap::PrimaryKey;

/// Attribute value of an entity or a reference.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttributeValue {
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Boolean value.
    Bool(bool),
}

impl AttributeValue {
    /// Compares two values of compatible types; `None` for mismatched types.
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        match (self, other) {
            (AttributeValue::Int(a), AttributeValue::Int(b)) => Some(a.cmp(b)),
            (AttributeValue::Float(a), AttributeValue::Float(b)) => a.partial_cmp(b),
            (AttributeValue::Int(a), AttributeValue::Float(b)) => (*a as f64).partial_cmp(b),
            (AttributeValue::Float(a), AttributeValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (AttributeValue::Text(a), AttributeValue::Text(b)) => Some(a.cmp(b)),
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// Reference from an entity to another (possibly hierarchical) entity.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityReference {
    /// Name of the reference type.
    pub name: String,
    /// Primary key of the referenced entity.
    pub referenced_primary_key: PrimaryKey,
    /// Attributes stored on the reference itself.
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// Fully materialized entity with its attributes and references.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SealedEntity {
    /// Entity type name.
    pub entity_type: String,
    /// Primary key.
    pub primary_key: PrimaryKey,
    /// Entity attributes.
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Outgoing references.
    pub references: Vec<EntityReference>,
}

impl SealedEntity {
    /// Creates an entity without attributes or references.
    pub fn new(entity_type: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            entity_type: entity_type.into(),
            primary_key,
            attributes: BTreeMap::new(),
            references: Vec::new(),
        }
    }

    /// Adds an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Adds a reference with its attributes.
    pub fn with_reference<I, K, V>(
        mut self,
        name: impl Into<String>,
        referenced_primary_key: PrimaryKey,
        attributes: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        self.references.push(EntityReference {
            name: name.into(),
            referenced_primary_key,
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
        self
    }

    /// Looks up an entity attribute.
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Iterates references of the given name.
    pub fn references_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a EntityReference> {
        self.references.iter().filter(move |r| r.name == name)
    }

    /// Looks up a single reference by name and referenced primary key.
    pub fn reference(&self, name: &str, referenced_primary_key: PrimaryKey) -> Option<&EntityReference> {
        self.references
            .iter()
            .find(|r| r.name == name && r.referenced_primary_key == referenced_primary_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_same_types() {
        assert_eq!(
            AttributeValue::Int(1).compare(&AttributeValue::Int(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            AttributeValue::from("b").compare(&AttributeValue::from("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(
            AttributeValue::Int(2).compare(&AttributeValue::Float(2.0)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_compare_mismatched_types() {
        assert_eq!(AttributeValue::Int(1).compare(&AttributeValue::Bool(true)), None);
    }

    #[test]
    fn test_reference_lookup() {
        let entity = SealedEntity::new("product", 1)
            .with_attribute("code", "p-1")
            .with_reference("offers", 10, [("price", 300i64)])
            .with_reference("offers", 11, [("price", 100i64)])
            .with_reference("brand", 5, Vec::<(String, AttributeValue)>::new());

        assert_eq!(entity.references_named("offers").count(), 2);
        let offer = entity.reference("offers", 11).unwrap();
        assert_eq!(offer.attributes.get("price"), Some(&AttributeValue::Int(100)));
        assert!(entity.reference("brand", 10).is_none());
    }
}
