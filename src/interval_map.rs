//! A sorted collection of disjoint `(start, length, value)` intervals.
//!
//! Intervals can be inserted in any order; an insertion that would overlap an
//! existing interval is rejected, so every position belongs to at most one
//! value.

use crate::error::{DisasmError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval<T> {
    pub start: usize,
    pub length: usize,
    pub value: T,
}

impl<T> Interval<T> {
    /// One past the last covered position
    pub fn end(&self) -> usize {
        self.start + self.length
    }

    pub fn covers(&self, position: usize) -> bool {
        position >= self.start && position < self.end()
    }
}

/// An uncovered span reported by [`IntervalMap::find_gaps`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub start: usize,
    pub length: usize,
}

impl Gap {
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// Outcome of offering two adjacent values to a coalesce function
pub enum Coalesced<T> {
    /// The pair became a single value spanning both intervals.
    Fused(T),
    /// The pair is left alone.
    Kept(T, T),
}

#[derive(Debug, Clone)]
pub struct IntervalMap<T> {
    entries: Vec<Interval<T>>,
}

impl<T> Default for IntervalMap<T> {
    fn default() -> Self {
        IntervalMap {
            entries: Vec::new(),
        }
    }
}

impl<T> IntervalMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval<T>> {
        self.entries.iter()
    }

    pub fn insert(&mut self, start: usize, length: usize, value: T) -> Result<()> {
        if length == 0 {
            return Err(DisasmError::EmptyInterval { start });
        }

        let overlap = |existing: &Interval<T>| DisasmError::Overlap {
            start,
            length,
            existing_start: existing.start,
            existing_length: existing.length,
        };

        let idx = match self.entries.binary_search_by_key(&start, |e| e.start) {
            Ok(i) => return Err(overlap(&self.entries[i])),
            Err(i) => i,
        };
        if let Some(next) = self.entries.get(idx) {
            if start + length > next.start {
                return Err(overlap(next));
            }
        }
        if idx > 0 {
            let prev = &self.entries[idx - 1];
            if prev.end() > start {
                return Err(overlap(prev));
            }
        }

        self.entries.insert(
            idx,
            Interval {
                start,
                length,
                value,
            },
        );
        Ok(())
    }

    fn index_of(&self, position: usize) -> Option<usize> {
        match self.entries.binary_search_by_key(&position, |e| e.start) {
            Ok(i) => Some(i),
            // the candidate at i starts after position, so only its
            // predecessor can cover it
            Err(0) => None,
            Err(i) if self.entries[i - 1].covers(position) => Some(i - 1),
            Err(_) => None,
        }
    }

    /// The interval covering `position`, if any
    pub fn get(&self, position: usize) -> Option<&Interval<T>> {
        self.index_of(position).map(|i| &self.entries[i])
    }

    pub fn contains(&self, position: usize) -> bool {
        self.index_of(position).is_some()
    }

    /// Offer each pair of exactly adjacent intervals that lie entirely within
    /// `window_start..window_start + window_length` to `combine`. A fused
    /// result is offered again with its new right-hand neighbor, so chains of
    /// adjacent intervals can collapse into one.
    pub fn coalesce<F>(&mut self, window_start: usize, window_length: usize, mut combine: F)
    where
        F: FnMut(T, T) -> Coalesced<T>,
    {
        let window_end = window_start + window_length;
        let lo = self.entries.partition_point(|e| e.start < window_start);
        let hi = lo + self.entries[lo..].partition_point(|e| e.end() <= window_end);
        if hi - lo < 2 {
            return;
        }

        let mut merged: Vec<Interval<T>> = Vec::with_capacity(hi - lo);
        let mut window = self.entries.drain(lo..hi).collect::<Vec<_>>().into_iter();
        let Some(mut acc) = window.next() else {
            return;
        };
        for next in window {
            if acc.end() != next.start {
                merged.push(std::mem::replace(&mut acc, next));
                continue;
            }
            let length = acc.length + next.length;
            match combine(acc.value, next.value) {
                Coalesced::Fused(value) => {
                    acc = Interval {
                        start: acc.start,
                        length,
                        value,
                    };
                }
                Coalesced::Kept(left, right) => {
                    merged.push(Interval {
                        start: acc.start,
                        length: acc.length,
                        value: left,
                    });
                    acc = Interval {
                        start: next.start,
                        length: next.length,
                        value: right,
                    };
                }
            }
        }
        merged.push(acc);
        self.entries.splice(lo..lo, merged);
    }

    /// Maximal uncovered spans within `window_start..window_start + window_length`
    pub fn find_gaps(&self, window_start: usize, window_length: usize) -> Vec<Gap> {
        let window_end = window_start + window_length;
        let mut gaps = Vec::new();
        let mut last = window_start;

        for e in &self.entries {
            if e.end() <= last {
                continue;
            }
            if e.start >= window_end {
                break;
            }
            if e.start > last {
                gaps.push(Gap {
                    start: last,
                    length: e.start - last,
                });
            }
            last = e.end();
        }

        if last < window_end {
            gaps.push(Gap {
                start: last,
                length: window_end - last,
            });
        }
        gaps
    }
}

impl<'a, T> IntoIterator for &'a IntervalMap<T> {
    type Item = &'a Interval<T>;
    type IntoIter = std::slice::Iter<'a, Interval<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
