//! Sparse memo tables for inside and outside probabilities.

use fixedbitset::FixedBitSet;
use std::collections::BTreeMap;

/// Linearizes `(start, end, non-terminal)` triples for one string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanIndexer {
    pub len: usize,
    pub nt_count: usize,
}

impl SpanIndexer {
    pub fn new(len: usize, nt_count: usize) -> Self {
        Self { len, nt_count }
    }

    pub fn capacity(&self) -> usize {
        self.nt_count * self.len * self.len
    }

    /// `None` unless `start <= end < len` and `nt < nt_count`.
    #[inline]
    pub fn index(&self, start: usize, end: usize, nt: usize) -> Option<usize> {
        if start > end || end >= self.len || nt >= self.nt_count {
            return None;
        }
        Some((nt * self.len + start) * self.len + end)
    }

    pub fn triple(&self, index: usize) -> Option<(usize, usize, usize)> {
        if index >= self.capacity() {
            return None;
        }
        let end = index % self.len;
        let start = (index / self.len) % self.len;
        let nt = index / (self.len * self.len);
        if start > end {
            return None;
        }
        Some((start, end, nt))
    }
}

/// Which triples have been evaluated during the current parameter epoch.
#[derive(Debug, Clone)]
pub struct ComputeFlags {
    bits: FixedBitSet,
}

impl ComputeFlags {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bits: FixedBitSet::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn is_set(&self, index: usize) -> bool {
        self.bits.contains(index)
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        self.bits.insert(index);
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones(..)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoEntry {
    /// Probability is 1 for every parameter assignment.
    ConstantOne,
    /// Parameter dependent; slot in the value buffer.
    Computed(usize),
}

/// Result of consulting a [`MemoTable`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup {
    Known { value: f64, constant: bool },
    Unknown,
}

/// Sparse `(start, end, nt) -> probability` map for one corpus string.
///
/// Absent keys mean probability 0. `ConstantOne` entries survive parameter
/// changes; every `Computed` entry and every flag is dropped when the epoch
/// moves on.
#[derive(Debug, Clone)]
pub struct MemoTable {
    entries: BTreeMap<usize, MemoEntry>,
    values: Vec<f64>,
    /// `values` slots that hold parameter-independent results.
    constant_values: FixedBitSet,
    flags: ComputeFlags,
    epoch: Option<u64>,
}

impl MemoTable {
    pub fn new(indexer: SpanIndexer) -> Self {
        Self {
            entries: BTreeMap::new(),
            values: Vec::new(),
            constant_values: FixedBitSet::new(),
            flags: ComputeFlags::with_capacity(indexer.capacity()),
            epoch: None,
        }
    }

    /// Drops stale values when `epoch` differs from the one the table was
    /// filled under.
    pub fn sync(&mut self, epoch: u64) {
        if self.epoch != Some(epoch) {
            self.invalidate();
            self.epoch = Some(epoch);
        }
    }

    pub fn invalidate(&mut self) {
        self.entries
            .retain(|_, entry| matches!(entry, MemoEntry::ConstantOne));
        self.values.clear();
        self.constant_values.clear();
        self.flags.clear();
    }

    #[inline]
    pub fn lookup(&self, index: usize) -> Lookup {
        match self.entries.get(&index) {
            Some(MemoEntry::ConstantOne) => Lookup::Known {
                value: 1.0,
                constant: true,
            },
            Some(MemoEntry::Computed(slot)) if self.flags.is_set(index) => Lookup::Known {
                value: self.values[*slot],
                constant: self.constant_values.contains(*slot),
            },
            Some(MemoEntry::Computed(_)) => Lookup::Unknown,
            None if self.flags.is_set(index) => Lookup::Known {
                value: 0.0,
                constant: true,
            },
            None => Lookup::Unknown,
        }
    }

    /// Records a freshly computed value. Constant zeros stay absent and
    /// constant ones become sentinels; everything else takes a buffer slot.
    pub fn store(&mut self, index: usize, value: f64, constant: bool) {
        self.flags.set(index);
        if constant && value == 0.0 {
            self.entries.remove(&index);
            return;
        }
        if constant && value == 1.0 {
            self.entries.insert(index, MemoEntry::ConstantOne);
            return;
        }
        let slot = match self.entries.get(&index) {
            Some(MemoEntry::Computed(slot)) if *slot < self.values.len() => {
                self.values[*slot] = value;
                *slot
            }
            _ => {
                self.values.push(value);
                let slot = self.values.len() - 1;
                self.entries.insert(index, MemoEntry::Computed(slot));
                slot
            }
        };
        self.constant_values.grow(slot + 1);
        self.constant_values.set(slot, constant);
    }

    pub fn entry(&self, index: usize) -> Option<MemoEntry> {
        self.entries.get(&index).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn constant_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, MemoEntry::ConstantOne))
            .count()
    }

    pub fn visited(&self) -> usize {
        self.flags.count()
    }
}
