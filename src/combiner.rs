// 🔀 Cross-Category Combiner - synthetic "All" entry per (district, year)
//
// The "All" stat is computed from the union of the per-type aggregates:
// counts and sums add exactly and the median comes from the merged
// histograms. It is never an average of per-type averages or medians.

use crate::aggregator::{FinalizedStat, RunningAggregate, SumOverflow, YearGroups};
use crate::error::{PipelineError, Result};
use crate::extractor::{PropertyType, ALL_CATEGORIES_CODE};
use crate::writer::{DistrictStats, YearOutput};
use std::collections::BTreeMap;

/// Combine one district-year's per-type aggregates into the "All" stat
///
/// Returns `Ok(None)` when there is nothing to combine (count_all == 0).
pub fn combine(
    per_type: &BTreeMap<PropertyType, &RunningAggregate>,
) -> std::result::Result<Option<FinalizedStat>, SumOverflow> {
    let mut all = RunningAggregate::new();
    for agg in per_type.values() {
        all.absorb(agg)?;
    }
    Ok(all.finalize())
}

/// Build the finalized output for one year: per-type stats plus "All"
pub fn assemble_year(year: i32, districts: &YearGroups<'_>) -> Result<YearOutput> {
    let mut data = BTreeMap::new();

    for (district_id, per_type) in districts {
        let mut stats = DistrictStats::new();

        for (property_type, agg) in per_type {
            if let Some(stat) = agg.finalize() {
                stats.insert(property_type.code().to_string(), stat);
            }
        }

        let all = combine(per_type).map_err(|_| PipelineError::NumericOverflow {
            group: format!("{}/{}/{}", district_id, year, ALL_CATEGORIES_CODE),
        })?;

        if let Some(stat) = all {
            stats.insert(ALL_CATEGORIES_CODE.to_string(), stat);
            data.insert(district_id.clone(), stats);
        }
    }

    Ok(YearOutput { year, data })
}

// ============================================================================
// TESTS
// ============================================================================
