// 📊 Group Aggregator - mergeable running statistics per (district, year, type)
//
// Median policy: EXACT retention. Every group keeps a price histogram
// (price → occurrences), so partial aggregates merge by adding counts and the
// median of any merge is the median of the unsplit input. Medians are never
// averaged across batches.

use crate::error::{PipelineError, Result};
use crate::extractor::{self, ExtractionStats, PropertyType, TransactionRecord};
use csv::ByteRecord;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

// ============================================================================
// KEYS AND OUTPUT STATS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub district_id: String,
    pub year: i32,
    pub property_type: PropertyType,
}

impl GroupKey {
    pub fn new(district_id: &str, year: i32, property_type: PropertyType) -> Self {
        GroupKey {
            district_id: district_id.to_string(),
            year,
            property_type,
        }
    }

    pub fn of(record: &TransactionRecord) -> Self {
        GroupKey {
            district_id: record.district_id.clone(),
            year: record.year,
            property_type: record.property_type,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.district_id,
            self.year,
            self.property_type.code()
        )
    }
}

/// The only form a group's statistics take outside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedStat {
    pub avg: u64,
    pub median: u64,
    pub count: u64,
}

/// Sum exceeded u64 while adding a price or merging aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SumOverflow;

// ============================================================================
// ROUNDING
// ============================================================================

/// numerator / denominator rounded half-to-even, computed exactly
pub fn round_ratio(numerator: u128, denominator: u128) -> u64 {
    debug_assert!(denominator > 0);
    let quotient = numerator / denominator;
    let twice_remainder = (numerator % denominator) * 2;

    let rounded = if twice_remainder > denominator
        || (twice_remainder == denominator && quotient % 2 == 1)
    {
        quotient + 1
    } else {
        quotient
    };

    rounded as u64
}

// ============================================================================
// RUNNING AGGREGATE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunningAggregate {
    count: u64,
    sum: u64,
    histogram: BTreeMap<u64, u64>,
}

impl RunningAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_prices<I: IntoIterator<Item = u64>>(prices: I) -> std::result::Result<Self, SumOverflow> {
        let mut agg = RunningAggregate::new();
        for price in prices {
            agg.observe(price)?;
        }
        Ok(agg)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// Number of distinct prices retained
    pub fn distinct_prices(&self) -> usize {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn observe(&mut self, price: u64) -> std::result::Result<(), SumOverflow> {
        self.sum = self.sum.checked_add(price).ok_or(SumOverflow)?;
        self.count += 1;
        *self.histogram.entry(price).or_insert(0) += 1;
        Ok(())
    }

    /// Fold another aggregate into this one without consuming it
    pub fn absorb(&mut self, other: &RunningAggregate) -> std::result::Result<(), SumOverflow> {
        self.sum = self.sum.checked_add(other.sum).ok_or(SumOverflow)?;
        self.count += other.count;
        for (price, occurrences) in &other.histogram {
            *self.histogram.entry(*price).or_insert(0) += occurrences;
        }
        Ok(())
    }

    /// round(sum / count)
    pub fn mean(&self) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        Some(round_ratio(self.sum as u128, self.count as u128))
    }

    /// Exact median; an even count averages the two middle prices
    pub fn median(&self) -> Option<u64> {
        if self.count == 0 {
            return None;
        }

        let upper_rank = self.count / 2;
        let upper = self.price_at_rank(upper_rank)?;

        if self.count % 2 == 1 {
            return Some(upper);
        }

        let lower = self.price_at_rank(upper_rank - 1)?;
        Some(round_ratio(lower as u128 + upper as u128, 2))
    }

    /// Price at 0-indexed rank in ascending order
    fn price_at_rank(&self, rank: u64) -> Option<u64> {
        let mut seen = 0u64;
        for (price, occurrences) in &self.histogram {
            seen += occurrences;
            if rank < seen {
                return Some(*price);
            }
        }
        None
    }

    pub fn finalize(&self) -> Option<FinalizedStat> {
        Some(FinalizedStat {
            avg: self.mean()?,
            median: self.median()?,
            count: self.count,
        })
    }
}

/// Merge two aggregates; associative and commutative
pub fn merge(
    a: RunningAggregate,
    b: RunningAggregate,
) -> std::result::Result<RunningAggregate, SumOverflow> {
    // Fold the smaller histogram into the larger one
    let (mut target, source) = if a.histogram.len() >= b.histogram.len() {
        (a, b)
    } else {
        (b, a)
    };
    target.absorb(&source)?;
    Ok(target)
}

// ============================================================================
// GROUP AGGREGATOR
// ============================================================================

/// Per-district view of one year: district → type → aggregate
pub type YearGroups<'a> = BTreeMap<String, BTreeMap<PropertyType, &'a RunningAggregate>>;

#[derive(Debug, Default)]
pub struct GroupAggregator {
    groups: HashMap<GroupKey, RunningAggregate>,
    stats: ExtractionStats,
}

impl GroupAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one validated record
    pub fn ingest_record(&mut self, record: TransactionRecord) -> Result<()> {
        let price = record.price;
        let key = GroupKey::of(&record);
        let agg = self.groups.entry(key).or_default();

        if agg.observe(price).is_err() {
            return Err(PipelineError::NumericOverflow {
                group: GroupKey::of(&record).to_string(),
            });
        }
        Ok(())
    }

    /// Add a batch of validated records
    pub fn ingest<I>(&mut self, batch: I) -> Result<()>
    where
        I: IntoIterator<Item = TransactionRecord>,
    {
        for record in batch {
            self.stats.record_accepted();
            self.ingest_record(record)?;
        }
        Ok(())
    }

    /// Extract and add a batch of raw rows; rejected rows are only counted
    pub fn ingest_rows(&mut self, rows: &[ByteRecord]) -> Result<()> {
        let before = self.stats.rejected_rows();

        for row in rows {
            match extractor::extract(row) {
                Ok(record) => {
                    self.stats.record_accepted();
                    self.ingest_record(record)?;
                }
                Err(reason) => self.stats.record_rejected(reason),
            }
        }

        debug!(
            "Ingested batch of {} rows ({} rejected), {} groups",
            rows.len(),
            self.stats.rejected_rows() - before,
            self.groups.len()
        );
        Ok(())
    }

    /// Fold a worker-local partial aggregate into this one
    ///
    /// All-or-nothing: every shared group is checked for sum overflow before
    /// anything is touched, so a failed merge leaves this aggregate unchanged.
    pub fn merge(&mut self, other: GroupAggregator) -> Result<()> {
        for (key, partial) in &other.groups {
            if let Some(existing) = self.groups.get(key) {
                if existing.sum().checked_add(partial.sum()).is_none() {
                    return Err(PipelineError::NumericOverflow {
                        group: key.to_string(),
                    });
                }
            }
        }

        for (key, partial) in other.groups {
            match self.groups.entry(key) {
                Entry::Occupied(mut slot) => {
                    slot.get_mut()
                        .absorb(&partial)
                        .map_err(|_| PipelineError::NumericOverflow {
                            group: slot.key().to_string(),
                        })?;
                }
                Entry::Vacant(slot) => {
                    slot.insert(partial);
                }
            }
        }

        self.stats.merge(&other.stats);
        Ok(())
    }

    pub fn stats(&self) -> &ExtractionStats {
        &self.stats
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Distinct years observed, ascending
    pub fn years(&self) -> BTreeSet<i32> {
        self.groups.keys().map(|k| k.year).collect()
    }

    /// Finalized stats for every non-empty group. Pure: repeated calls
    /// without further ingestion return identical maps.
    pub fn finalize(&self) -> BTreeMap<GroupKey, FinalizedStat> {
        self.groups
            .iter()
            .filter_map(|(key, agg)| agg.finalize().map(|stat| (key.clone(), stat)))
            .collect()
    }

    /// Groups partitioned by year, then district, then property type
    pub fn by_year(&self) -> BTreeMap<i32, YearGroups<'_>> {
        let mut years: BTreeMap<i32, YearGroups<'_>> = BTreeMap::new();

        for (key, agg) in &self.groups {
            if agg.is_empty() {
                continue;
            }
            years
                .entry(key.year)
                .or_default()
                .entry(key.district_id.clone())
                .or_default()
                .insert(key.property_type, agg);
        }

        years
    }
}

// ============================================================================
// TESTS
// ============================================================================
