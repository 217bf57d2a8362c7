//! Rope buffer: an immutable, concatenation-preserving list of borrowed byte
//! slices.
//!
//! A [`Rope`] never copies the bytes it is built from — it only records
//! which slices, in which order, make up the logical concatenation. Both the
//! [`crate::split`] chunker and the hashing helpers here walk the slices in
//! insertion order without ever materialising the concatenation.

use sha2::{Digest, Sha256};
use smallvec::SmallVec;

/// FNV-1a 32-bit offset basis.
const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
/// FNV-1a 32-bit prime.
const FNV_PRIME: u32 = 0x0100_0193;

/// An ordered sequence of non-owning byte slices, plus the total byte count.
///
/// `Rope::default()` is the empty rope. Appending never mutates a rope in
/// place; it consumes `self` and returns the extended rope, mirroring the
/// value semantics of the [`crate::split`] chunker's `(prefix, remainder)`
/// split.
#[derive(Debug, Default, Clone)]
pub struct Rope<'a> {
    parts: SmallVec<[&'a [u8]; 4]>,
    len: usize,
}

impl<'a> Rope<'a> {
    /// Returns the empty rope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of bytes represented by this rope.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the rope represents zero bytes. An empty slice appended to
    /// an otherwise-empty rope still makes `len() == 0` but `is_empty()`
    /// only reflects byte count, not element count.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The slices making up this rope, in insertion order. Empty slices are
    /// preserved as elements.
    pub fn slices(&self) -> &[&'a [u8]] {
        &self.parts
    }

    /// Returns a new rope with `slice` logically concatenated after `self`.
    pub fn append(mut self, slice: &'a [u8]) -> Self {
        self.len += slice.len();
        self.parts.push(slice);
        self
    }

    /// Returns a new rope with every slice of `other`, in order, appended
    /// after `self`.
    pub fn append_rope(mut self, other: &Rope<'a>) -> Self {
        for p in other.slices() {
            self = self.append(p);
        }
        self
    }

    /// Feeds every contained slice, in insertion order, into an FNV-1a
    /// 32-bit hash and appends the 4-byte big-endian digest to `seed`.
    pub fn hash_fnv32(&self, mut seed: Vec<u8>) -> Vec<u8> {
        let mut hash = FNV_OFFSET_BASIS;
        for part in &self.parts {
            for &byte in *part {
                hash ^= u32::from(byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        }
        seed.extend_from_slice(&hash.to_be_bytes());
        seed
    }

    /// Feeds every contained slice, in insertion order, into a SHA-256 digest
    /// and appends the 32-byte digest to `seed`.
    pub fn hash_sha256(&self, mut seed: Vec<u8>) -> Vec<u8> {
        let mut hasher = Sha256::new();
        for part in &self.parts {
            hasher.update(part);
        }
        seed.extend_from_slice(&hasher.finalize());
        seed
    }

    /// Copies the full concatenation into a freshly allocated `Vec<u8>`.
    /// Intended for tests and small buffers; production paths should prefer
    /// streaming over `slices()`.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for part in &self.parts {
            out.extend_from_slice(part);
        }
        out
    }
}

impl<'a> FromIterator<&'a [u8]> for Rope<'a> {
    fn from_iter<T: IntoIterator<Item = &'a [u8]>>(iter: T) -> Self {
        let mut rope = Rope::new();
        for part in iter {
            rope = rope.append(part);
        }
        rope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn append_preserves_empty_slices_as_elements() {
        let rope = Rope::new().append(&[]).append(b"a");
        assert_eq!(rope.slices().len(), 2);
        assert_eq!(rope.len(), 1);
    }

    #[test]
    fn hash_sha256_is_invariant_to_slice_boundaries() {
        let joined = Rope::new().append(&[0, 0]);
        let split = Rope::new().append(&[0]).append(&[0]);
        let joined_hash = joined.hash_sha256(Vec::new());
        let split_hash = split.hash_sha256(Vec::new());
        assert_eq!(joined_hash, split_hash);
        assert_eq!(
            hex(&joined_hash),
            "96a296d224f285c67bee93c30f8a309157f0daa35dc5b87e410b78630a09cfc7"
        );
    }

    #[test]
    fn hash_fnv32_is_invariant_to_slice_boundaries() {
        let joined = Rope::new().append(&[0, 0]);
        let split = Rope::new().append(&[0]).append(&[0]);
        let joined_hash = joined.hash_fnv32(Vec::new());
        let split_hash = split.hash_fnv32(Vec::new());
        assert_eq!(joined_hash, split_hash);
        assert_eq!(hex(&joined_hash), "117697cd");
    }

    #[test]
    fn append_rope_preserves_order() {
        let a = Rope::new().append(b"ab");
        let b = Rope::new().append(b"cd").append(b"ef");
        let combined = a.append_rope(&b);
        assert_eq!(combined.to_vec(), b"abcdef");
    }

    proptest::proptest! {
        #[test]
        fn proptest_hashes_are_invariant_to_arbitrary_slicing(
            data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..1024),
            cuts in proptest::collection::vec(0_usize..1024, 0..16),
        ) {
            let mut boundaries: Vec<usize> = cuts.into_iter().map(|c| c.min(data.len())).collect();
            boundaries.push(0);
            boundaries.push(data.len());
            boundaries.sort_unstable();
            boundaries.dedup();

            let mut rope = Rope::new();
            for w in boundaries.windows(2) {
                rope = rope.append(&data[w[0]..w[1]]);
            }

            proptest::prop_assert_eq!(rope.to_vec(), data.clone());
            proptest::prop_assert_eq!(rope.hash_fnv32(Vec::new()), Rope::new().append(&data).hash_fnv32(Vec::new()));
            proptest::prop_assert_eq!(rope.hash_sha256(Vec::new()), Rope::new().append(&data).hash_sha256(Vec::new()));
        }
    }
}
