//! Shard range index
//!
//! Maps sharding keys to the partition owning their interval. Intervals come
//! from an [`IntervalProvider`]; the index only remembers which intervals
//! currently have a partition, keyed by lower bound.
//!
//! Lookups take a read lock. Creating a partition for a new interval is
//! double-checked: look up under the read lock, then take the creation lock
//! and look again before creating, so concurrent first writers to an
//! interval create exactly one partition.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::query::KeyRange;
use crate::table_config::IntervalProvider;

/// A half-open key interval `[lower, upper)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval {
    pub lower: i64,
    pub upper: i64,
}

impl Interval {
    pub fn contains(&self, key: i64) -> bool {
        self.lower <= key && key < self.upper
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.lower, self.upper)
    }
}

/// Ordered set of intervals, each owning one partition `P`
pub struct ShardRangeIndex<P> {
    intervals: IntervalProvider,
    partitions: RwLock<BTreeMap<i64, Arc<P>>>,
    create_lock: Mutex<()>,
}

impl<P> ShardRangeIndex<P> {
    /// Empty index over `intervals`
    pub fn new(intervals: IntervalProvider) -> Self {
        Self {
            intervals,
            partitions: RwLock::new(BTreeMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    /// Index pre-populated with existing partitions, keyed by lower bound
    pub fn from_partitions(
        intervals: IntervalProvider,
        partitions: impl IntoIterator<Item = (i64, P)>,
    ) -> Self {
        let index = Self::new(intervals);
        {
            let mut map = index.write();
            for (lower, partition) in partitions {
                map.insert(lower, Arc::new(partition));
            }
        }
        index
    }

    pub fn intervals(&self) -> &IntervalProvider {
        &self.intervals
    }

    /// The interval containing `key`
    pub fn interval_of(&self, key: i64) -> Interval {
        let lower = self.intervals.lower_bound(key);
        Interval {
            lower,
            upper: self.intervals.upper_bound(lower),
        }
    }

    /// The partition owning `key`, if its interval has one
    pub fn locate(&self, key: i64) -> Option<Arc<P>> {
        let lower = self.intervals.lower_bound(key);
        self.read().get(&lower).cloned()
    }

    /// The partition owning `key`, creating it with `create` if needed
    ///
    /// `create` runs at most once per interval, under the creation lock.
    pub fn get_or_create<E>(
        &self,
        key: i64,
        create: impl FnOnce(Interval) -> Result<P, E>,
    ) -> Result<Arc<P>, E> {
        let interval = self.interval_of(key);
        if let Some(existing) = self.read().get(&interval.lower) {
            return Ok(Arc::clone(existing));
        }

        let _creating = self
            .create_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = self.read().get(&interval.lower) {
            return Ok(Arc::clone(existing));
        }

        let partition = Arc::new(create(interval)?);
        self.write().insert(interval.lower, Arc::clone(&partition));
        Ok(partition)
    }

    /// Partitions whose interval shares a key with `range`, in key order
    pub fn overlapping(&self, range: &KeyRange) -> Vec<(Interval, Arc<P>)> {
        if range.is_empty() {
            return Vec::new();
        }

        // The interval holding range.lo may start below it
        let start = self.intervals.lower_bound(range.lo);
        self.read()
            .range(start..)
            .map(|(lower, partition)| {
                let interval = Interval {
                    lower: *lower,
                    upper: self.intervals.upper_bound(*lower),
                };
                (interval, Arc::clone(partition))
            })
            .take_while(|(interval, _)| interval.lower <= range.hi)
            .filter(|(interval, _)| range.overlaps(interval.lower, interval.upper))
            .collect()
    }

    /// Every partition, in key order
    pub fn all(&self) -> Vec<(Interval, Arc<P>)> {
        self.overlapping(&KeyRange::full())
    }

    /// Lower bounds of the known intervals, ascending
    pub fn lower_bounds(&self) -> Vec<i64> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<i64, Arc<P>>> {
        self.partitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<i64, Arc<P>>> {
        self.partitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<P> fmt::Debug for ShardRangeIndex<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardRangeIndex")
            .field("intervals", &self.intervals)
            .field("lower_bounds", &self.lower_bounds())
            .finish()
    }
}
