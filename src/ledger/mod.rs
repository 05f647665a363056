use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::LedgerError;
use crate::models::TradeRecord;

pub const DEFAULT_LEDGER_PATH: &str = "logs/trade_log.csv";
const HEADER: [&str; 6] = ["timestamp", "symbol", "amount", "trade_type", "side", "status"];

/// Append-only CSV record of every resolved order
///
/// One row per record, written in resolution order by a single writer. The
/// header is written when the file is first created and never again.
#[derive(Debug, Clone)]
pub struct TradeLedger {
    path: PathBuf,
}

impl TradeLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, creating the parent directory and header on first use
    pub fn append(&self, record: &TradeRecord) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        // Serialize to memory so the row lands in a single write
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if needs_header {
            writer.write_record(HEADER)?;
        }
        writer.serialize(record)?;
        let bytes = writer
            .into_inner()
            .map_err(|e| LedgerError::Io(e.into_error()))?;

        let mut file = file;
        file.write_all(&bytes)?;
        file.flush()?;

        tracing::debug!(
            "Recorded {} {} {} {:?} in {}",
            record.side,
            record.amount,
            record.symbol,
            record.resolution,
            self.path.display()
        );

        Ok(())
    }

    /// Read every record back, oldest first. A missing file is an empty ledger.
    pub fn read_all(&self) -> Result<Vec<TradeRecord>, LedgerError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row?);
        }
        Ok(records)
    }
}

impl Default for TradeLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_PATH)
    }
}
