// 📂 Row Source - headerless positional CSV → fixed-size batches of raw rows
// Validates shape only; field contents are the extractor's concern

use crate::error::{PipelineError, Result};
use crate::extractor::COLUMN_COUNT;
use csv::{ByteRecord, Reader, ReaderBuilder};
use std::fs::File;
use std::io;
use std::path::Path;

pub struct RowSource<R: io::Read> {
    reader: Reader<R>,
    rows_read: u64,
}

impl RowSource<File> {
    /// Open a Price Paid file; a missing file is fatal before any aggregation
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PipelineError::InputNotFound {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path)?;
        Ok(RowSource::from_reader(file))
    }
}

impl<R: io::Read> RowSource<R> {
    pub fn from_reader(rdr: R) -> Self {
        // The published file has no header row; column count is checked per
        // row so a short row is reported as a schema problem, not a CSV error
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(rdr);

        RowSource {
            reader,
            rows_read: 0,
        }
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Read up to `batch_size` rows. `Ok(None)` once the input is exhausted.
    pub fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<ByteRecord>>> {
        let mut batch = Vec::with_capacity(batch_size.min(64 * 1024));

        while batch.len() < batch_size {
            let mut record = ByteRecord::new();
            if !self.reader.read_byte_record(&mut record)? {
                break;
            }

            if record.len() != COLUMN_COUNT {
                let line = record
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(self.rows_read + 1);
                return Err(PipelineError::SchemaMismatch {
                    line,
                    expected: COLUMN_COUNT,
                    found: record.len(),
                });
            }

            self.rows_read += 1;
            batch.push(record);
        }

        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
