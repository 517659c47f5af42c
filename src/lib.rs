// Price Paid Stats - Core Library
// Turns the Land Registry Price Paid log into per-year district statistics

pub mod config;
pub mod error;
pub mod extractor;      // Record Extractor - raw row → TransactionRecord
pub mod aggregator;     // Group Aggregator - exact, mergeable running stats
pub mod combiner;       // Cross-Category Combiner - synthetic "All" entry
pub mod writer;         // Writer - atomic per-year JSON artifacts
pub mod source;         // Row Source - headerless CSV in batches
pub mod pipeline;       // Pipeline - bounded queue, worker pool, run state

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use extractor::{
    extract, extract_district, parse_price, parse_year,
    ExtractionStats, PropertyType, RejectReason, TransactionRecord,
    ALL_CATEGORIES_CODE, COLUMN_COUNT,
};
pub use aggregator::{
    merge, round_ratio, FinalizedStat, GroupAggregator, GroupKey, RunningAggregate, SumOverflow,
};
pub use combiner::{assemble_year, combine};
pub use writer::{read_artifact, ArtifactReceipt, ArtifactWriter, DistrictStats, YearOutput};
pub use source::RowSource;
pub use pipeline::{run, run_from_reader, AggregationRun, RunReport, RunState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
