// 🏗️ Record Extractor - one raw Price Paid row → validated TransactionRecord
// Field-by-field parsing; every failure maps to a RejectReason, never a panic

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use csv::ByteRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// INPUT LAYOUT
// ============================================================================

/// Number of positional columns in every Price Paid row
pub const COLUMN_COUNT: usize = 16;

/// Positions of the columns the engine consumes (0-indexed)
pub mod columns {
    pub const PRICE: usize = 1;
    pub const DATE: usize = 2;
    pub const POSTCODE: usize = 3;
    pub const PROPERTY_TYPE: usize = 4;
}

/// Output code of the synthetic "all property types" category
pub const ALL_CATEGORIES_CODE: &str = "A";

// ============================================================================
// CORE TYPES
// ============================================================================

/// PropertyType - the four categories kept from the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyType {
    Detached,
    Semi,
    Terraced,
    Flat,
}

impl PropertyType {
    pub const ALL: [PropertyType; 4] = [
        PropertyType::Detached,
        PropertyType::Semi,
        PropertyType::Terraced,
        PropertyType::Flat,
    ];

    /// Single-letter code used in the source file and in artifacts
    pub fn code(&self) -> &'static str {
        match self {
            PropertyType::Detached => "D",
            PropertyType::Semi => "S",
            PropertyType::Terraced => "T",
            PropertyType::Flat => "F",
        }
    }

    /// Parse a source code. "O" (other) and anything else is not a kept category.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "D" => Some(PropertyType::Detached),
            "S" => Some(PropertyType::Semi),
            "T" => Some(PropertyType::Terraced),
            "F" => Some(PropertyType::Flat),
            _ => None,
        }
    }
}

/// TransactionRecord - the only fields the aggregator needs from a sale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub price: u64,
    pub year: i32,
    pub district_id: String,
    pub property_type: PropertyType,
}

impl TransactionRecord {
    pub fn new(price: u64, year: i32, district_id: &str, property_type: PropertyType) -> Self {
        TransactionRecord {
            price,
            year,
            district_id: district_id.to_string(),
            property_type,
        }
    }
}

/// Why a row was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RejectReason {
    Price,
    Date,
    Postcode,
    PropertyType,
}

impl RejectReason {
    /// Source column the rejection refers to
    pub fn field(&self) -> &'static str {
        match self {
            RejectReason::Price => "price",
            RejectReason::Date => "date",
            RejectReason::Postcode => "postcode",
            RejectReason::PropertyType => "property_type",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}", self.field())
    }
}

// ============================================================================
// FIELD PARSERS
// ============================================================================

/// Extract the postcode district (outward code) from a full postcode
///
/// # Examples:
/// ```
/// use price_paid_stats::extract_district;
///
/// assert_eq!(extract_district("SW1A 1AA"), Some("SW1A".to_string()));
/// assert_eq!(extract_district("m1 1aa"), Some("M1".to_string()));
/// assert_eq!(extract_district("invalid"), None);
/// assert_eq!(extract_district(""), None);
/// ```
pub fn extract_district(postcode: &str) -> Option<String> {
    let mut parts = postcode.split_whitespace();

    let outward = parts.next()?;
    parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    Some(outward.to_uppercase())
}

/// Price as a non-negative integer
pub fn parse_price(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse::<u64>().ok()
}

/// Calendar year of a transfer date
///
/// The published file writes dates as "1995-01-01 00:00"; the bare date and
/// seconds-precision forms are accepted too.
pub fn parse_year(raw: &str) -> Option<i32> {
    let trimmed = raw.trim();

    for format in ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt.year());
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .map(|d| d.year())
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Extract a validated record from one positional row
///
/// Only the consumed columns are decoded. A missing column or one that is
/// not valid UTF-8 rejects on that field; bytes in any other column are
/// never inspected. Column-count problems are the row source's concern.
pub fn extract(row: &ByteRecord) -> Result<TransactionRecord, RejectReason> {
    let price = decode_field(row, columns::PRICE, RejectReason::Price)?;
    let price = parse_price(price).ok_or(RejectReason::Price)?;

    let date = decode_field(row, columns::DATE, RejectReason::Date)?;
    let year = parse_year(date).ok_or(RejectReason::Date)?;

    let postcode = decode_field(row, columns::POSTCODE, RejectReason::Postcode)?;
    let district_id = extract_district(postcode).ok_or(RejectReason::Postcode)?;

    let code = decode_field(row, columns::PROPERTY_TYPE, RejectReason::PropertyType)?;
    let property_type = PropertyType::from_code(code).ok_or(RejectReason::PropertyType)?;

    Ok(TransactionRecord {
        price,
        year,
        district_id,
        property_type,
    })
}

/// A missing column reads as empty; undecodable bytes reject as `reason`
fn decode_field(row: &ByteRecord, idx: usize, reason: RejectReason) -> Result<&str, RejectReason> {
    match row.get(idx) {
        Some(bytes) => std::str::from_utf8(bytes).map_err(|_| reason),
        None => Ok(""),
    }
}

// ============================================================================
// EXTRACTION STATS
// ============================================================================

/// Row counters kept per worker and merged with the partial aggregates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_rows: u64,
    pub rejected: BTreeMap<RejectReason, u64>,
}

impl ExtractionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&mut self) {
        self.total_rows += 1;
    }

    pub fn record_rejected(&mut self, reason: RejectReason) {
        self.total_rows += 1;
        *self.rejected.entry(reason).or_insert(0) += 1;
    }

    pub fn rejected_rows(&self) -> u64 {
        self.rejected.values().sum()
    }

    pub fn valid_rows(&self) -> u64 {
        self.total_rows - self.rejected_rows()
    }

    pub fn merge(&mut self, other: &ExtractionStats) {
        self.total_rows += other.total_rows;
        for (reason, count) in &other.rejected {
            *self.rejected.entry(*reason).or_insert(0) += count;
        }
    }

    pub fn summary(&self) -> String {
        let breakdown: Vec<String> = self
            .rejected
            .iter()
            .map(|(reason, count)| format!("{}: {}", reason.field(), count))
            .collect();

        format!(
            "{} rows: {} valid, {} rejected ({})",
            self.total_rows,
            self.valid_rows(),
            self.rejected_rows(),
            if breakdown.is_empty() {
                "none".to_string()
            } else {
                breakdown.join(", ")
            }
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
