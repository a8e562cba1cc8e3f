//! Structural hashing helpers.
//!
//! Every formula node derives its hash from a kind tag, its parameters and
//! the hashes of its children. XXH3 is used throughout so hashes are stable
//! across processes and can serve as keys of a shared cache.

use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::bitmap::Bitmap;

/// Incremental builder of a 64-bit structural hash.
pub struct StructuralHasher(Xxh3);

impl StructuralHasher {
    /// Starts a hash seeded with the kind tag of a node.
    pub fn new(tag: &str) -> Self {
        let mut hasher = Xxh3::new();
        feed_str(&mut hasher, tag);
        Self(hasher)
    }

    /// Feeds a single 64-bit value.
    pub fn u64(mut self, value: u64) -> Self {
        feed_u64(&mut self.0, value);
        self
    }

    /// Feeds a string parameter.
    pub fn str(mut self, value: &str) -> Self {
        feed_str(&mut self.0, value);
        self
    }

    /// Feeds child hashes in their given order.
    pub fn ordered(mut self, hashes: impl IntoIterator<Item = u64>) -> Self {
        for hash in hashes {
            feed_u64(&mut self.0, hash);
        }
        self
    }

    /// Feeds child hashes as a multiset so the result ignores their order.
    pub fn unordered(self, hashes: impl IntoIterator<Item = u64>) -> Self {
        let mut sorted: Vec<u64> = hashes.into_iter().collect();
        sorted.sort_unstable();
        let len = sorted.len() as u64;
        self.u64(len).ordered(sorted)
    }

    /// Finishes the hash.
    pub fn finish(&self) -> u64 {
        self.0.digest()
    }
}

/// Content hash of a bitmap.
pub fn hash_bitmap(bitmap: &Bitmap) -> u64 {
    let mut hasher = Xxh3::new();
    feed_u64(&mut hasher, bitmap.size() as u64);
    for value in bitmap.iter() {
        hasher.update(&value.to_be_bytes());
    }
    hasher.digest()
}

/// Hash of a sorted, distinct list of transactional resource ids.
pub fn hash_transactional_ids(ids: &[u64]) -> u64 {
    let mut bytes = Vec::with_capacity(ids.len() * 8);
    for id in ids {
        bytes.extend_from_slice(&id.to_be_bytes());
    }
    xxh3_64(&bytes)
}

fn feed_u64(hasher: &mut Xxh3, value: u64) {
    hasher.update(&value.to_be_bytes());
}

fn feed_str(hasher: &mut Xxh3, value: &str) {
    feed_u64(hasher, value.len() as u64);
    hasher.update(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unordered_ignores_order() {
        let a = StructuralHasher::new("and").unordered([3, 1, 2]).finish();
        let b = StructuralHasher::new("and").unordered([1, 2, 3]).finish();
        assert_eq!(a, b);
    }

    #[test]
    fn test_ordered_respects_order() {
        let a = StructuralHasher::new("not").ordered([1, 2]).finish();
        let b = StructuralHasher::new("not").ordered([2, 1]).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tag_separates_kinds() {
        let and = StructuralHasher::new("and").unordered([1, 2]).finish();
        let or = StructuralHasher::new("or").unordered([1, 2]).finish();
        assert_ne!(and, or);
    }

    #[test]
    fn test_bitmap_hash_is_content_based() {
        let a = Bitmap::from_iter([1, 2, 3]);
        let b = Bitmap::from_iter([3, 2, 1]);
        let c = Bitmap::from_iter([1, 2, 4]);
        assert_eq!(hash_bitmap(&a), hash_bitmap(&b));
        assert_ne!(hash_bitmap(&a), hash_bitmap(&c));
    }
}
