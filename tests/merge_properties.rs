//! Property-based tests for aggregate merging and the derived "All" entry.
//!
//! - partitioned aggregation merged in any order equals unsplit aggregation
//! - merge is associative and commutative
//! - medians do not depend on input order
//! - avg × count stays within half a unit per row of the true sum
//! - "All" count, avg and median equal those of the union of per-type prices

use proptest::prelude::*;
use std::collections::BTreeMap;

use price_paid_stats::{
    assemble_year, merge, round_ratio, GroupAggregator, PropertyType, RunningAggregate,
    TransactionRecord, ALL_CATEGORIES_CODE,
};

const DISTRICTS: [&str; 3] = ["M1", "SW1A", "EC1A"];

// =============================================================================
// Strategies
// =============================================================================

fn arb_records() -> impl Strategy<Value = Vec<TransactionRecord>> {
    prop::collection::vec(
        (0u64..2_000_000, 0usize..DISTRICTS.len(), 2019i32..2022, 0usize..4),
        0..80,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .map(|(price, district, year, property_type)| {
                TransactionRecord::new(price, year, DISTRICTS[district], PropertyType::ALL[property_type])
            })
            .collect()
    })
}

/// Records plus the same records cut into chunks, chunks in shuffled order
fn arb_partitioned() -> impl Strategy<Value = (Vec<TransactionRecord>, Vec<Vec<TransactionRecord>>)> {
    (arb_records(), 1usize..10).prop_flat_map(|(records, chunk_size)| {
        let chunks: Vec<Vec<TransactionRecord>> =
            records.chunks(chunk_size).map(|c| c.to_vec()).collect();
        (Just(records), Just(chunks).prop_shuffle())
    })
}

fn arb_prices() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..5_000_000, 0..60)
}

fn aggregate(prices: &[u64]) -> RunningAggregate {
    RunningAggregate::from_prices(prices.iter().copied()).unwrap()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn partitioned_merge_equals_unsplit((records, chunks) in arb_partitioned()) {
        let mut whole = GroupAggregator::new();
        whole.ingest(records).unwrap();

        let mut canonical = GroupAggregator::new();
        for chunk in chunks {
            let mut partial = GroupAggregator::new();
            partial.ingest(chunk).unwrap();
            canonical.merge(partial).unwrap();
        }

        prop_assert_eq!(canonical.finalize(), whole.finalize());
        prop_assert_eq!(canonical.stats(), whole.stats());
    }

    #[test]
    fn merge_is_associative_and_commutative(a in arb_prices(), b in arb_prices(), c in arb_prices()) {
        let (a, b, c) = (aggregate(&a), aggregate(&b), aggregate(&c));

        let left = merge(merge(a.clone(), b.clone()).unwrap(), c.clone()).unwrap();
        let right = merge(a.clone(), merge(b.clone(), c.clone()).unwrap()).unwrap();
        let swapped = merge(c, merge(b, a).unwrap()).unwrap();

        prop_assert_eq!(&left, &right);
        prop_assert_eq!(&left, &swapped);
    }

    #[test]
    fn median_is_order_invariant(
        (prices, shuffled) in arb_prices().prop_flat_map(|p| (Just(p.clone()), Just(p).prop_shuffle()))
    ) {
        prop_assert_eq!(aggregate(&prices).median(), aggregate(&shuffled).median());
    }

    #[test]
    fn mean_times_count_tracks_sum(prices in prop::collection::vec(0u64..5_000_000, 1..60)) {
        let agg = aggregate(&prices);
        let stat = agg.finalize().unwrap();

        let true_sum: u128 = prices.iter().map(|p| *p as u128).sum();
        let reconstructed = stat.avg as u128 * stat.count as u128;
        let diff = true_sum.abs_diff(reconstructed);

        // |avg - sum/count| <= 0.5  ⇔  |avg·count - sum| <= count/2
        prop_assert!(diff * 2 <= stat.count as u128);
    }

    #[test]
    fn all_entry_matches_union_of_types(records in arb_records()) {
        let mut prices: BTreeMap<(i32, String), Vec<u64>> = BTreeMap::new();
        for record in &records {
            prices
                .entry((record.year, record.district_id.clone()))
                .or_default()
                .push(record.price);
        }

        let mut aggregator = GroupAggregator::new();
        aggregator.ingest(records).unwrap();

        for (year, districts) in aggregator.by_year() {
            let output = assemble_year(year, &districts).unwrap();

            for (district, stats) in &output.data {
                let all = stats[ALL_CATEGORIES_CODE];
                let per_type: u64 = stats
                    .iter()
                    .filter(|(code, _)| code.as_str() != ALL_CATEGORIES_CODE)
                    .map(|(_, stat)| stat.count)
                    .sum();
                prop_assert_eq!(all.count, per_type, "district {}", district);

                let mut union = prices[&(year, district.clone())].clone();
                union.sort_unstable();
                let count = union.len() as u128;
                let total: u128 = union.iter().map(|&p| p as u128).sum();
                prop_assert_eq!(all.count as u128, count);
                prop_assert_eq!(all.avg, round_ratio(total, count), "district {}", district);

                let mid = union.len() / 2;
                let median = if union.len() % 2 == 1 {
                    union[mid]
                } else {
                    round_ratio(union[mid - 1] as u128 + union[mid] as u128, 2)
                };
                prop_assert_eq!(all.median, median, "district {}", district);
            }
        }
    }
}
