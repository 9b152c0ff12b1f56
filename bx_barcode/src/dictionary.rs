//!
//! Exact-match index over a barcode whitelist.
//!
//! Entries are kept sorted by packed code. A jump table indexed by the high 24 bits of the
//! code narrows a lookup to the entries sharing those bits, which are then binary searched.
//!
use crate::codec::{leading_barcode, PackedBarcode};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Number of buckets in the jump table, one per value of the high 24 bits of a code.
pub const JUMP_TABLE_SIZE: usize = 1 << 24;

/// One whitelist barcode with its observed count and derived prior.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct BarcodeEntry {
    pub barcode: PackedBarcode,
    pub count: u32,
    /// Only meaningful after `BarcodeDictionary::compute_priors`.
    pub prior: f64,
}

impl BarcodeEntry {
    fn new(barcode: PackedBarcode, count: u32) -> Self {
        BarcodeEntry {
            barcode,
            count,
            prior: 0.0,
        }
    }
}

pub struct BarcodeDictionary {
    jump: Vec<u32>,
    entries: Vec<BarcodeEntry>,
    unfound: u64,
}

impl BarcodeDictionary {
    /// Build a dictionary with zero counts from whitelist barcodes.
    /// Duplicate barcodes are collapsed into a single entry.
    pub fn build(barcodes: impl IntoIterator<Item = PackedBarcode>) -> Self {
        let mut barcodes: Vec<_> = barcodes.into_iter().collect();
        barcodes.sort_unstable();
        barcodes.dedup();
        let entries = barcodes
            .into_iter()
            .map(|bc| BarcodeEntry::new(bc, 0))
            .collect();
        Self::from_sorted_entries(entries)
    }

    /// Assemble a dictionary from entries that are already strictly ascending by code.
    pub(crate) fn from_sorted_entries(entries: Vec<BarcodeEntry>) -> Self {
        let jump = build_jump_table(&entries);
        Self::from_parts(jump, entries)
    }

    /// `jump` must equal `build_jump_table(&entries)`.
    pub(crate) fn from_parts(jump: Vec<u32>, entries: Vec<BarcodeEntry>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].barcode < w[1].barcode));
        debug_assert_eq!(jump.len(), JUMP_TABLE_SIZE);
        BarcodeDictionary {
            jump,
            entries,
            unfound: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[BarcodeEntry] {
        &self.entries
    }

    pub fn jump_table(&self) -> &[u32] {
        &self.jump
    }

    /// Number of observed barcodes that matched no whitelist entry.
    pub fn unfound(&self) -> u64 {
        self.unfound
    }

    /// Sum of the counts of all whitelist entries.
    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.count)).sum()
    }

    /// The range of entry positions whose codes share the high 24 bits of `barcode`.
    #[inline]
    fn bucket_range(&self, barcode: PackedBarcode) -> Option<Range<usize>> {
        let size = self.entries.len();
        let h = barcode.high24();
        let lo = self.jump[h] as usize;
        if lo == size {
            return None;
        }
        let hi = if h == JUMP_TABLE_SIZE - 1 {
            size
        } else {
            self.jump[h + 1] as usize
        };
        if lo == hi {
            return None;
        }
        Some(lo..hi)
    }

    /// Position of `barcode` in the sorted entry array, if it is whitelisted.
    #[inline]
    pub fn lookup_index(&self, barcode: PackedBarcode) -> Option<usize> {
        let range = self.bucket_range(barcode)?;
        let lo = range.start;
        self.entries[range]
            .binary_search_by_key(&barcode, |e| e.barcode)
            .ok()
            .map(|i| lo + i)
    }

    #[inline]
    pub fn lookup(&self, barcode: PackedBarcode) -> Option<&BarcodeEntry> {
        self.lookup_index(barcode).map(|i| &self.entries[i])
    }

    /// Count one observation of `barcode`. Returns false and counts it as unfound if the
    /// barcode is not whitelisted. Counts saturate at `u32::MAX`.
    pub fn increment(&mut self, barcode: PackedBarcode) -> bool {
        match self.lookup_index(barcode) {
            Some(i) => {
                self.entries[i].count = self.entries[i].count.saturating_add(1);
                true
            }
            None => {
                self.unfound += 1;
                false
            }
        }
    }

    /// Merge counts accumulated elsewhere, given in entry order, saturating at `u32::MAX`.
    pub fn add_counts(&mut self, counts: &[u32], unfound: u64) {
        assert_eq!(
            counts.len(),
            self.entries.len(),
            "count vector does not match the dictionary size"
        );
        for (entry, &count) in self.entries.iter_mut().zip(counts) {
            entry.count = entry.count.saturating_add(count);
        }
        self.unfound += unfound;
    }

    /// Set each prior to its Laplace-smoothed relative count, (count + 1) / sum(count + 1).
    /// Must be called again if counts change.
    pub fn compute_priors(&mut self) {
        let total: u64 = self
            .entries
            .iter()
            .map(|e| u64::from(e.count) + 1)
            .sum();
        let total = total as f64;
        for entry in &mut self.entries {
            entry.prior = (f64::from(entry.count) + 1.0) / total;
        }
    }

    /// Map an entry position onto one of `n_buckets` contiguous, roughly equal partitions.
    #[inline]
    pub fn bucket_of(&self, index: usize, n_buckets: usize) -> usize {
        assert!(index < self.entries.len());
        ((index as u128 * n_buckets as u128) / self.entries.len() as u128) as usize
    }
}

/// `jump[h]` is the position of the first entry whose high 24 bits are >= h, or
/// `entries.len()` if there is none.
pub(crate) fn build_jump_table(entries: &[BarcodeEntry]) -> Vec<u32> {
    let size = entries.len() as u32;
    let mut jump = vec![0u32; JUMP_TABLE_SIZE];
    let mut last_hi = 0usize;
    for (i, entry) in entries.iter().enumerate() {
        let hi = entry.barcode.high24();
        if hi != last_hi {
            assert!(hi > last_hi, "whitelist entries are not sorted");
            jump[last_hi + 1..=hi].fill(i as u32);
            last_hi = hi;
        }
    }
    jump[last_hi + 1..].fill(size);
    jump
}

/// Count observations from many threads against a read-only dictionary.
///
/// Entry positions are split into contiguous shards with `BarcodeDictionary::bucket_of`,
/// and each shard is guarded by its own lock. Merge the result back with
/// `BarcodeDictionary::add_counts`.
pub struct ShardedCounter<'a> {
    dict: &'a BarcodeDictionary,
    starts: Vec<usize>,
    shards: Vec<Mutex<Vec<u32>>>,
    unfound: AtomicU64,
}

impl<'a> ShardedCounter<'a> {
    pub fn new(dict: &'a BarcodeDictionary, n_shards: usize) -> Self {
        let n_shards = n_shards.clamp(1, dict.len().max(1));
        let mut starts = vec![dict.len(); n_shards];
        for index in (0..dict.len()).rev() {
            starts[dict.bucket_of(index, n_shards)] = index;
        }
        let shards = (0..n_shards)
            .map(|s| {
                let end = starts.get(s + 1).copied().unwrap_or(dict.len());
                Mutex::new(vec![0u32; end - starts[s]])
            })
            .collect();
        ShardedCounter {
            dict,
            starts,
            shards,
            unfound: AtomicU64::new(0),
        }
    }

    /// Same contract as `BarcodeDictionary::increment`.
    pub fn observe(&self, barcode: PackedBarcode) -> bool {
        match self.dict.lookup_index(barcode) {
            Some(index) => {
                let s = self.dict.bucket_of(index, self.shards.len());
                let mut shard = self.shards[s]
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let slot = &mut shard[index - self.starts[s]];
                *slot = slot.saturating_add(1);
                true
            }
            None => {
                self.unfound.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Same as `observe` on the leading barcode of a read; None if the read was skipped.
    pub fn observe_read(&self, seq: &[u8]) -> Option<bool> {
        leading_barcode(seq).map(|bc| self.observe(bc))
    }

    /// Counts in entry order and the number of unfound observations.
    pub fn finish(self) -> (Vec<u32>, u64) {
        let mut counts = Vec::with_capacity(self.dict.len());
        for shard in self.shards {
            counts.extend(shard.into_inner().unwrap_or_else(PoisonError::into_inner));
        }
        (counts, self.unfound.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::{btree_set, vec};
    use proptest::prelude::*;
    use rayon::prelude::*;

    fn bc(seq: &[u8; 16]) -> PackedBarcode {
        PackedBarcode::encode(seq)
    }

    fn check_invariants(dict: &BarcodeDictionary) {
        assert!(dict
            .entries()
            .windows(2)
            .all(|w| w[0].barcode < w[1].barcode));
        assert_eq!(dict.jump_table().len(), JUMP_TABLE_SIZE);
        assert!(dict.jump_table().windows(2).all(|w| w[0] <= w[1]));
        assert!(dict
            .jump_table()
            .iter()
            .all(|&j| j as usize <= dict.len()));
    }

    #[test]
    fn test_build_sorts_and_dedups() {
        let dict = BarcodeDictionary::build([
            bc(b"TTTTTTTTTTTTTTTT"),
            bc(b"ACGTACGTACGTACGT"),
            bc(b"AAAAAAAAAAAAAAAA"),
            bc(b"ACGTACGTACGTACGT"),
        ]);
        assert_eq!(dict.len(), 3);
        check_invariants(&dict);
        assert_eq!(dict.entries()[0].barcode, bc(b"AAAAAAAAAAAAAAAA"));
        assert_eq!(dict.entries()[2].barcode, bc(b"TTTTTTTTTTTTTTTT"));
        assert!(dict.entries().iter().all(|e| e.count == 0));
    }

    #[test]
    fn test_lookup_edges() {
        let dict = BarcodeDictionary::build([
            bc(b"AAAAAAAAAAAAAAAA"),
            bc(b"AAAAAAAAAAAAAAAT"),
            bc(b"CCCCCCCCCCCCCCCC"),
            bc(b"TTTTTTTTTTTTTTTT"),
        ]);
        check_invariants(&dict);
        // Bucket 0, shared by two entries
        assert_eq!(dict.lookup_index(bc(b"AAAAAAAAAAAAAAAA")), Some(0));
        assert_eq!(dict.lookup_index(bc(b"AAAAAAAAAAAAAAAT")), Some(1));
        assert!(dict.lookup(bc(b"AAAAAAAAAAAAAAAG")).is_none());
        // Top bucket
        assert_eq!(dict.lookup_index(bc(b"TTTTTTTTTTTTTTTT")), Some(3));
        assert!(dict.lookup(bc(b"TTTTTTTTTTTTTTTG")).is_none());
        // Empty buckets between entries
        assert!(dict.lookup(bc(b"CCCCCCCCCCCCCCCA")).is_none());
        assert!(dict.lookup(bc(b"GGGGGGGGGGGGGGGG")).is_none());
    }

    #[test]
    fn test_empty_dictionary() {
        let mut dict = BarcodeDictionary::build([]);
        assert!(dict.is_empty());
        check_invariants(&dict);
        assert!(dict.jump_table().iter().all(|&j| j == 0));
        assert!(dict.lookup(bc(b"AAAAAAAAAAAAAAAA")).is_none());
        assert!(dict.lookup(bc(b"TTTTTTTTTTTTTTTT")).is_none());
        assert!(!dict.increment(bc(b"AAAAAAAAAAAAAAAA")));
        assert_eq!(dict.unfound(), 1);
    }

    #[test]
    fn test_jump_table_first_bucket_nonzero() {
        let dict = BarcodeDictionary::build([bc(b"GGGGGGGGGGGGGGGG")]);
        check_invariants(&dict);
        let h = bc(b"GGGGGGGGGGGGGGGG").high24();
        assert!(dict.jump_table()[..=h].iter().all(|&j| j == 0));
        assert!(dict.jump_table()[h + 1..].iter().all(|&j| j == 1));
    }

    #[test]
    fn test_counting() {
        let bc_a = bc(b"AAAAAAAAAAAAAAAA");
        let mut dict = BarcodeDictionary::build([bc_a]);
        for _ in 0..5 {
            assert!(dict.increment(bc_a));
        }
        assert!(!dict.increment(bc(b"AAAAAAAAAAAAAAAC")));
        assert!(!dict.increment(bc(b"CAAAAAAAAAAAAAAA")));
        assert_eq!(dict.lookup(bc_a).unwrap().count, 5);
        assert_eq!(dict.unfound(), 2);
        assert_eq!(dict.total_count(), 5);
    }

    #[test]
    fn test_observe_read() {
        let mut dict = BarcodeDictionary::build([bc(b"AAAAAAAAAAAAAAAA")]);
        let reads: [&[u8]; 6] = [
            b"AAAAAAAAAAAAAAAACGTTGCA",
            b"aaaaaaaaaaaaaaaaTTTT",
            b"AAAAAAAAAAAAAAAA",
            b"AAAAAAAAAAAAAAAC",
            b"AAAAAAAAAAAAAAANAAAA",
            b"AAAA",
        ];
        let counter = ShardedCounter::new(&dict, 4);
        let observed: Vec<_> = reads.iter().map(|r| counter.observe_read(r)).collect();
        assert_eq!(
            observed,
            [Some(true), Some(true), Some(true), Some(false), None, None]
        );
        let (counts, unfound) = counter.finish();
        dict.add_counts(&counts, unfound);
        assert_eq!(dict.entries()[0].count, 3);
        // Reads with an N or too short to hold a barcode are not counted at all.
        assert_eq!(dict.unfound(), 1);
    }

    #[test]
    fn test_counts_saturate() {
        let bc_a = bc(b"AAAAAAAAAAAAAAAA");
        let mut dict = BarcodeDictionary::build([bc_a]);
        dict.add_counts(&[u32::MAX - 1], 0);
        assert!(dict.increment(bc_a));
        assert!(dict.increment(bc_a));
        assert_eq!(dict.lookup(bc_a).unwrap().count, u32::MAX);
        dict.add_counts(&[7], 0);
        assert_eq!(dict.lookup(bc_a).unwrap().count, u32::MAX);
    }

    #[test]
    fn test_priors() {
        let mut dict = BarcodeDictionary::build([
            bc(b"AAAAAAAAAAAAAAAA"),
            bc(b"CCCCCCCCCCCCCCCC"),
            bc(b"GGGGGGGGGGGGGGGG"),
        ]);
        for _ in 0..7 {
            dict.increment(bc(b"AAAAAAAAAAAAAAAA"));
        }
        dict.compute_priors();
        let priors: Vec<f64> = dict.entries().iter().map(|e| e.prior).collect();
        // (7 + 1) / 10, (0 + 1) / 10, (0 + 1) / 10
        assert!((priors[0] - 0.8).abs() < 1e-12);
        assert!((priors[1] - 0.1).abs() < 1e-12);
        assert!((priors[2] - 0.1).abs() < 1e-12);
        assert!((priors.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bucket_of() {
        let dict = BarcodeDictionary::build(
            (0..100u32).map(|i| PackedBarcode::from_code(i.wrapping_mul(0x9E37_79B9))),
        );
        assert_eq!(dict.len(), 100);
        assert_eq!(dict.bucket_of(0, 4), 0);
        assert_eq!(dict.bucket_of(24, 4), 0);
        assert_eq!(dict.bucket_of(25, 4), 1);
        assert_eq!(dict.bucket_of(99, 4), 3);
        let buckets: Vec<_> = (0..dict.len()).map(|i| dict.bucket_of(i, 7)).collect();
        assert!(buckets.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(buckets.last(), Some(&6));
    }

    #[test]
    fn test_sharded_counter_matches_sequential() {
        let whitelist: Vec<_> = (0..1000u32)
            .map(|i| PackedBarcode::from_code(i.wrapping_mul(2_654_435_761)))
            .collect();
        let observations: Vec<_> = (0..20_000u32)
            .map(|i| PackedBarcode::from_code((i % 1500).wrapping_mul(2_654_435_761)))
            .collect();

        let mut sequential = BarcodeDictionary::build(whitelist.iter().copied());
        for &obs in &observations {
            sequential.increment(obs);
        }

        let mut sharded = BarcodeDictionary::build(whitelist.iter().copied());
        let counter = ShardedCounter::new(&sharded, 16);
        observations.par_iter().for_each(|&obs| {
            counter.observe(obs);
        });
        let (counts, unfound) = counter.finish();
        sharded.add_counts(&counts, unfound);

        assert_eq!(sharded.unfound(), sequential.unfound());
        // 13 full cycles of 1500 observations, each with 500 misses
        assert_eq!(sharded.unfound(), 6500);
        assert_eq!(sharded.entries(), sequential.entries());
    }

    #[test]
    fn test_sharded_counter_more_shards_than_entries() {
        let mut dict =
            BarcodeDictionary::build([bc(b"AAAAAAAAAAAAAAAA"), bc(b"TTTTTTTTTTTTTTTT")]);
        let counter = ShardedCounter::new(&dict, 64);
        assert!(counter.observe(bc(b"TTTTTTTTTTTTTTTT")));
        assert!(!counter.observe(bc(b"GGGGGGGGGGGGGGGG")));
        let (counts, unfound) = counter.finish();
        assert_eq!(counts, vec![0, 1]);
        dict.add_counts(&counts, unfound);
        assert_eq!(dict.unfound(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn prop_lookup_iff_present(
            codes in btree_set(any::<u32>(), 0..300),
            probes in vec(any::<u32>(), 0..300),
        ) {
            let dict = BarcodeDictionary::build(codes.iter().map(|&c| PackedBarcode::from_code(c)));
            check_invariants(&dict);
            prop_assert_eq!(dict.len(), codes.len());
            for &c in &codes {
                let entry = dict.lookup(PackedBarcode::from_code(c));
                prop_assert_eq!(entry.map(|e| e.barcode.code()), Some(c));
            }
            for &p in &probes {
                prop_assert_eq!(
                    dict.lookup(PackedBarcode::from_code(p)).is_some(),
                    codes.contains(&p)
                );
            }
        }

        #[test]
        fn prop_priors_sum_to_one(counts in vec(0u32..10_000, 1..200)) {
            let mut dict = BarcodeDictionary::build(
                (0..counts.len() as u32).map(|i| PackedBarcode::from_code(i << 12)),
            );
            dict.add_counts(&counts, 0);
            dict.compute_priors();
            let total: f64 = dict.entries().iter().map(|e| e.prior).sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
            prop_assert!(dict.entries().iter().all(|e| e.prior > 0.0));
        }
    }
}
