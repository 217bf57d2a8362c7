//! Content-defined chunking (CDC) via a rolling hash.
//!
//! [`Split`] holds both the chunker's configuration and its scratch ring
//! buffer. It cuts a [`Rope`] into a `(prefix, remainder)` pair at a
//! data-dependent boundary, so that local edits to the input change only
//! the chunk boundaries near the edit. The splitter never deduplicates,
//! stores, or names chunks — it only chooses where to cut.
//!
//! Config fields left at zero are rewritten to documented defaults by
//! [`Split::reset`], which runs implicitly at the start of every
//! [`Split::split`] call. `min` is never defaulted: zero is a valid minimum
//! chunk length.

use crate::rope::Rope;

/// Default maximum chunk length when `max` is left at zero: `2^31 - 1`.
const DEFAULT_MAX: usize = (1_u64 << 31) as usize - 1;
/// Default rolling-hash mask when `mask` is left at zero: `2^12 - 1`.
const DEFAULT_MASK: u32 = (1 << 12) - 1;
/// Default rolling-hash trigger condition when `cond` is left at zero.
const DEFAULT_COND: u32 = (1 << 12) - 1;
/// Default ring window size when `window` is left at zero: `2^13`.
const DEFAULT_WINDOW: usize = 1 << 13;

/// Rolling-hash content-defined chunker.
///
/// A `Split` is mutable scratch space (the ring buffer) plus configuration;
/// callers must not share one `Split` across concurrent invocations. The
/// expected pattern is one `Split` per thread/task.
#[derive(Debug, Clone, Default)]
pub struct Split {
    /// Minimum allowed length of the emitted prefix. Relaxed only when the
    /// whole input is shorter than `min`.
    pub min: usize,
    /// Maximum allowed length of the emitted prefix. Zero means "use the
    /// default" (`2^31 - 1`) once [`reset`](Self::reset) runs.
    pub max: usize,
    /// Mask applied to the rolling hash accumulator before comparing to
    /// `cond`. Zero means "use the default" (`2^12 - 1`).
    pub mask: u32,
    /// Value the masked accumulator must equal for a cut to trigger. Zero
    /// means "use the default" (`2^12 - 1`).
    pub cond: u32,
    /// Size of the rolling window (and its scratch ring). Zero means "use
    /// the default" (`2^13`).
    pub window: usize,
    /// Scratch ring of the last `window` bytes seen; zeroed on every reset.
    ring: Vec<u8>,
}

impl Split {
    /// Creates a `Split` with all-default configuration (all zero fields,
    /// to be filled in by [`reset`](Self::reset) on first use).
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrites zero-valued fields to their defaults and (re)allocates or
    /// zeroes the ring. Invoked implicitly at the start of every
    /// [`split`](Self::split) call; safe to call directly to pre-warm the
    /// ring allocation.
    pub fn reset(&mut self) {
        if self.max == 0 {
            self.max = DEFAULT_MAX;
        }
        if self.mask == 0 {
            self.mask = DEFAULT_MASK;
        }
        if self.cond == 0 {
            self.cond = DEFAULT_COND;
        }
        if self.window == 0 {
            self.window = DEFAULT_WINDOW;
        }
        if self.ring.len() != self.window {
            self.ring = vec![0_u8; self.window];
        } else {
            self.ring.iter_mut().for_each(|b| *b = 0);
        }
    }

    /// Splits `input` into `(prefix, remainder)` such that their
    /// byte-wise concatenation equals `input`'s, `prefix.len() <= max`, and
    /// `prefix.len() >= min(min, input.len())`. The cut point is the
    /// smallest byte index `k >= 1` with `k >= min` and the rolling hash
    /// masked by `mask` equal to `cond`, or `k == max`, whichever comes
    /// first. If the input is exhausted before either condition triggers,
    /// the entire input becomes the prefix and the remainder is empty.
    ///
    /// The inner loop processes four bytes at a time whenever the ring has
    /// room for it, falling back to one byte at a time near input or ring
    /// boundaries; it stays linear in input length even when the ring is
    /// longer than the remaining input.
    pub fn split<'a>(&mut self, input: Rope<'a>) -> (Rope<'a>, Rope<'a>) {
        self.reset();

        let window = self.window;
        let mask = self.mask;
        let cond = self.cond;
        let mut min = self.min as i64;
        let mut max = self.max as i64;
        let mut acc: u32 = 0;
        let mut l: usize = 0;

        let slices = input.slices();
        let mut prefix = Rope::new();

        for (i, &p) in slices.iter().enumerate() {
            let n = p.len();
            let mut j = 0_usize;
            while j < n {
                while j + 3 < n && l + 3 < window {
                    acc = acc.wrapping_add(u32::from(p[j])).wrapping_sub(u32::from(self.ring[l]));
                    if cut_here(j + 1, min, max, acc, mask, cond) {
                        return self.emit(prefix, p, j + 1, slices, i);
                    }
                    acc = acc
                        .wrapping_add(u32::from(p[j + 1]))
                        .wrapping_sub(u32::from(self.ring[l + 1]));
                    if cut_here(j + 2, min, max, acc, mask, cond) {
                        return self.emit(prefix, p, j + 2, slices, i);
                    }
                    acc = acc
                        .wrapping_add(u32::from(p[j + 2]))
                        .wrapping_sub(u32::from(self.ring[l + 2]));
                    if cut_here(j + 3, min, max, acc, mask, cond) {
                        return self.emit(prefix, p, j + 3, slices, i);
                    }
                    acc = acc
                        .wrapping_add(u32::from(p[j + 3]))
                        .wrapping_sub(u32::from(self.ring[l + 3]));
                    if cut_here(j + 4, min, max, acc, mask, cond) {
                        return self.emit(prefix, p, j + 4, slices, i);
                    }
                    self.ring[l] = p[j];
                    self.ring[l + 1] = p[j + 1];
                    self.ring[l + 2] = p[j + 2];
                    self.ring[l + 3] = p[j + 3];
                    l = (l + 4) % window;
                    j += 4;
                }
                if j < n {
                    acc = acc.wrapping_add(u32::from(p[j])).wrapping_sub(u32::from(self.ring[l]));
                    if cut_here(j + 1, min, max, acc, mask, cond) {
                        return self.emit(prefix, p, j + 1, slices, i);
                    }
                    self.ring[l] = p[j];
                    l = (l + 1) % window;
                    j += 1;
                }
            }
            prefix = prefix.append(p);
            min -= n as i64;
            max -= n as i64;
        }
        (prefix, Rope::new())
    }

    /// Builds the `(prefix, remainder)` pair for a cut found at `p[..cut]`,
    /// with `p` the segment currently being scanned (segment index `i`
    /// within `slices`) and the remaining segments appended to the
    /// remainder untouched.
    fn emit<'a>(
        &self,
        prefix: Rope<'a>,
        p: &'a [u8],
        cut: usize,
        slices: &[&'a [u8]],
        i: usize,
    ) -> (Rope<'a>, Rope<'a>) {
        let prefix = prefix.append(&p[..cut]);
        let mut remainder = Rope::new().append(&p[cut..]);
        for rest in &slices[i + 1..] {
            remainder = remainder.append(rest);
        }
        (prefix, remainder)
    }
}

/// Evaluates the cut test at byte offset `k` (1-indexed within the current
/// segment prefix length): either the masked accumulator matches `cond` and
/// `k` has reached `min`, or `k` has reached `max`.
fn cut_here(k: usize, min: i64, max: i64, acc: u32, mask: u32, cond: u32) -> bool {
    let k = k as i64;
    (k >= min && (acc & mask) == cond) || k >= max
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rope(bytes: &[u8]) -> Rope<'_> {
        Rope::new().append(bytes)
    }

    fn base() -> Split {
        Split { min: 0, max: 1 << 20, mask: (1 << 12) - 1, cond: (1 << 12) - 1, window: 1 << 13, ..Split::new() }
    }

    #[test]
    fn nil_and_empty_input_yield_empty_output() {
        let mut s = base();
        let (g, r) = s.split(Rope::new());
        assert_eq!(g.len(), 0);
        assert_eq!(r.len(), 0);

        let mut s = base();
        let (g, r) = s.split(rope(&[]));
        assert_eq!(g.len(), 0);
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn mask_triggers_cut() {
        let mut s = base();
        s.mask = (1 << 3) - 1;
        s.cond = (1 << 3) - 1;

        let (g, r) = s.split(rope(b"\xff!"));
        assert_eq!(g.len(), 1);
        assert_eq!(r.len(), 1);

        let mut s = base();
        s.mask = (1 << 3) - 1;
        s.cond = (1 << 3) - 1;
        let (g, r) = s.split(rope(b"\xf0!"));
        assert_eq!(g.len(), 2);
        assert_eq!(r.len(), 0);

        let mut s = base();
        s.mask = (1 << 3) - 1;
        s.cond = (1 << 3) - 1;
        let (g, r) = s.split(rope(b"\xf0\x0f!"));
        assert_eq!(g.len(), 2);
        assert_eq!(r.len(), 1);

        let mut s = base();
        s.mask = (1 << 3) - 1;
        s.cond = (1 << 3) - 1;
        let (g, r) = s.split(rope(b"\xf0\x00!"));
        assert_eq!(g.len(), 3);
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn min_is_honoured() {
        let mut s = base();
        s.mask = (1 << 3) - 1;
        s.cond = (1 << 3) - 1;
        s.min = 2;
        let (g, r) = s.split(rope(b"\xff!"));
        assert_eq!(g.len(), 2);
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn max_is_honoured() {
        let mut s = base();
        let (g, r) = s.split(rope(b"abcde"));
        assert_eq!(g.len(), 5);
        assert_eq!(r.len(), 0);

        let mut s = base();
        s.max = 3;
        let (g, r) = s.split(rope(b"abcde"));
        assert_eq!(g.len(), 3);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn repeated_splitting_reconstructs_input() {
        let data: Vec<u8> = (0_u32..5000).map(|i| (i * 2654435761_u32) as u8).collect();
        let mut s = base();
        let mut remaining = rope(&data);
        let mut chunks: Vec<u8> = Vec::new();
        loop {
            let (g, r) = s.split(remaining);
            chunks.extend_from_slice(&g.to_vec());
            if r.len() == 0 {
                break;
            }
            remaining = r;
        }
        assert_eq!(chunks, data);
    }

    #[test]
    fn determinism_same_input_same_cuts() {
        let data: Vec<u8> = (0_u32..10_000).map(|i| (i * 1103515245_u32 + 12345) as u8).collect();

        let cut_lengths = |data: &[u8]| -> Vec<usize> {
            let mut s = base();
            let mut remaining = Rope::new().append(data);
            let mut lens = Vec::new();
            loop {
                let (g, r) = s.split(remaining);
                lens.push(g.len());
                if r.len() == 0 {
                    break;
                }
                remaining = r;
            }
            lens
        };

        assert_eq!(cut_lengths(&data), cut_lengths(&data));
    }

    proptest::proptest! {
        #[test]
        fn proptest_repeated_splitting_reconstructs_arbitrary_input(data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..4096)) {
            let mut s = Split { max: 257, mask: (1 << 5) - 1, cond: (1 << 5) - 1, ..Split::new() };
            let mut remaining = Rope::new().append(&data);
            let mut chunks: Vec<u8> = Vec::new();
            loop {
                let (g, r) = s.split(remaining);
                proptest::prop_assert!(g.len() <= s.max);
                chunks.extend_from_slice(&g.to_vec());
                if r.len() == 0 {
                    break;
                }
                remaining = r;
            }
            proptest::prop_assert_eq!(chunks, data);
        }

        #[test]
        fn proptest_determinism_same_input_same_cuts(data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..4096)) {
            let cut_lengths = |data: &[u8]| -> Vec<usize> {
                let mut s = Split { max: 257, mask: (1 << 5) - 1, cond: (1 << 5) - 1, ..Split::new() };
                let mut remaining = Rope::new().append(data);
                let mut lens = Vec::new();
                loop {
                    let (g, r) = s.split(remaining);
                    lens.push(g.len());
                    if r.len() == 0 {
                        break;
                    }
                    remaining = r;
                }
                lens
            };
            proptest::prop_assert_eq!(cut_lengths(&data), cut_lengths(&data));
        }
    }
}
