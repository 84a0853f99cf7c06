//! Ranges of the consistent-hash ring
//!
//! A range `(begin, end]` is exclusive at the start and inclusive at the end.
//! When `begin > end` the range wraps past `u64::MAX` and is read as two
//! scans. When `begin == end` the range is empty.

/// One storage scan: hashes in `(after, end]`, or `[0, end]` without `after`
pub(crate) type Segment = (Option<u64>, u64);

/// An arc of the hash ring owned by a silo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashRange {
    pub begin: u64,
    pub end: u64,
}

impl HashRange {
    pub fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn wraps(&self) -> bool {
        self.begin > self.end
    }

    pub fn contains(&self, hash: u64) -> bool {
        if self.wraps() {
            hash > self.begin || hash <= self.end
        } else {
            hash > self.begin && hash <= self.end
        }
    }

    /// Storage scans covering this range
    pub(crate) fn segments(&self) -> Vec<Segment> {
        if self.is_empty() {
            Vec::new()
        } else if self.wraps() {
            let mut segments = Vec::with_capacity(2);
            if self.begin < u64::MAX {
                segments.push((Some(self.begin), u64::MAX));
            }
            segments.push((None, self.end));
            segments
        } else {
            vec![(Some(self.begin), self.end)]
        }
    }
}
