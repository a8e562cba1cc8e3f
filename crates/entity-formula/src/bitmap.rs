//! Immutable bitmap of primary keys.
//!
//! [`Bitmap`] wraps a [`RoaringBitmap`] behind an [`Arc`] so that memoized
//! formula results can be handed out to any number of parents without copying
//! the underlying containers. All set operations produce a new bitmap.
//!
//! # Example
//!
//! ```rust
//! use entity_formula::Bitmap;
//!
//! let a = Bitmap::from_iter([1, 2, 3, 4]);
//! let b = Bitmap::from_iter([3, 4, 5]);
//!
//! assert_eq!(a.and(&b).to_vec(), vec![3, 4]);
//! assert_eq!(a.or(&b).size(), 5);
//! assert_eq!(a.andnot(&b).to_vec(), vec![1, 2]);
//! ```

use std::fmt;
use std::sync::Arc;

use roaring::RoaringBitmap;

/// Primary key of an entity (or an internal price id).
pub type PrimaryKey = u32;

/// Shared, immutable set of 32-bit integers.
#[derive(Clone, Default, PartialEq)]
pub struct Bitmap(Arc<RoaringBitmap>);

impl Eq for Bitmap {}

impl Bitmap {
    /// Creates an empty bitmap.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps an already built roaring bitmap.
    pub fn from_roaring(bitmap: RoaringBitmap) -> Self {
        Self(Arc::new(bitmap))
    }

    /// Returns the underlying roaring bitmap.
    pub fn as_roaring(&self) -> &RoaringBitmap {
        &self.0
    }

    /// Number of integers in the bitmap.
    pub fn size(&self) -> usize {
        self.0.len() as usize
    }

    /// Returns true if the bitmap holds no integers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks membership of a single integer.
    pub fn contains(&self, value: PrimaryKey) -> bool {
        self.0.contains(value)
    }

    /// Smallest integer in the bitmap.
    pub fn first(&self) -> Option<PrimaryKey> {
        self.0.min()
    }

    /// Returns the integer at the given position of the ascending order.
    pub fn get(&self, index: usize) -> Option<PrimaryKey> {
        u32::try_from(index).ok().and_then(|n| self.0.select(n))
    }

    /// Position of the value in ascending order, if present.
    pub fn index_of(&self, value: PrimaryKey) -> Option<usize> {
        if self.0.contains(value) {
            Some(self.0.rank(value) as usize - 1)
        } else {
            None
        }
    }

    /// Intersection.
    pub fn and(&self, other: &Bitmap) -> Bitmap {
        Bitmap::from_roaring(self.as_roaring() & other.as_roaring())
    }

    /// Union.
    pub fn or(&self, other: &Bitmap) -> Bitmap {
        Bitmap::from_roaring(self.as_roaring() | other.as_roaring())
    }

    /// Difference: integers of `self` not present in `other`.
    pub fn andnot(&self, other: &Bitmap) -> Bitmap {
        Bitmap::from_roaring(self.as_roaring() - other.as_roaring())
    }

    /// Intersection of all bitmaps; empty for an empty input.
    pub fn and_all<'a, I>(bitmaps: I) -> Bitmap
    where
        I: IntoIterator<Item = &'a Bitmap>,
    {
        let mut iter = bitmaps.into_iter();
        let Some(first) = iter.next() else {
            return Bitmap::empty();
        };
        let mut result = first.as_roaring().clone();
        for bitmap in iter {
            if result.is_empty() {
                break;
            }
            result &= bitmap.as_roaring();
        }
        Bitmap::from_roaring(result)
    }

    /// Union of all bitmaps.
    pub fn or_all<'a, I>(bitmaps: I) -> Bitmap
    where
        I: IntoIterator<Item = &'a Bitmap>,
    {
        let mut result = RoaringBitmap::new();
        for bitmap in bitmaps {
            result |= bitmap.as_roaring();
        }
        Bitmap::from_roaring(result)
    }

    /// Iterates integers in ascending order.
    pub fn iter(&self) -> roaring::bitmap::Iter<'_> {
        self.0.iter()
    }

    /// Exports the integers as an ascending array.
    pub fn to_vec(&self) -> Vec<PrimaryKey> {
        self.0.iter().collect()
    }

    /// Serialized size in bytes, used as the memory estimate of cached payloads.
    pub fn serialized_size(&self) -> usize {
        self.0.serialized_size()
    }
}

impl FromIterator<PrimaryKey> for Bitmap {
    fn from_iter<T: IntoIterator<Item = PrimaryKey>>(iter: T) -> Self {
        Bitmap::from_roaring(iter.into_iter().collect())
    }
}

impl From<RoaringBitmap> for Bitmap {
    fn from(bitmap: RoaringBitmap) -> Self {
        Bitmap::from_roaring(bitmap)
    }
}

impl<'a> IntoIterator for &'a Bitmap {
    type Item = PrimaryKey;
    type IntoIter = roaring::bitmap::Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 16;
        let preview: Vec<PrimaryKey> = self.0.iter().take(PREVIEW).collect();
        if self.size() > PREVIEW {
            write!(f, "Bitmap({:?}.. of {})", preview, self.size())
        } else {
            write!(f, "Bitmap({:?})", preview)
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Bitmap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(self.as_roaring(), serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Bitmap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bitmap: RoaringBitmap = serde::Deserialize::deserialize(deserializer)?;
        Ok(Bitmap::from_roaring(bitmap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_operations() {
        let a = Bitmap::from_iter([1, 2, 3, 10]);
        let b = Bitmap::from_iter([2, 3, 4]);

        assert_eq!(a.and(&b).to_vec(), vec![2, 3]);
        assert_eq!(a.or(&b).to_vec(), vec![1, 2, 3, 4, 10]);
        assert_eq!(a.andnot(&b).to_vec(), vec![1, 10]);
    }

    #[test]
    fn test_and_all_short_circuits_on_empty() {
        let a = Bitmap::from_iter([1, 2]);
        let b = Bitmap::from_iter([3]);
        let c = Bitmap::from_iter([1, 2, 3]);
        assert!(Bitmap::and_all([&a, &b, &c]).is_empty());
        assert!(Bitmap::and_all(std::iter::empty::<&Bitmap>()).is_empty());
    }

    #[test]
    fn test_positional_access() {
        let bitmap = Bitmap::from_iter([5, 9, 42]);
        assert_eq!(bitmap.get(0), Some(5));
        assert_eq!(bitmap.get(2), Some(42));
        assert_eq!(bitmap.get(3), None);
        assert_eq!(bitmap.index_of(9), Some(1));
        assert_eq!(bitmap.index_of(10), None);
    }

    #[test]
    fn test_clone_shares_storage() {
        let bitmap = Bitmap::from_iter(0..1000);
        let clone = bitmap.clone();
        assert!(Arc::ptr_eq(&bitmap.0, &clone.0));
    }

    #[test]
    fn test_debug_truncates_large_bitmaps() {
        let bitmap = Bitmap::from_iter(0..100);
        let rendered = format!("{:?}", bitmap);
        assert!(rendered.ends_with(".. of 100)"));
    }
}
