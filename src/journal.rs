//! Append-only CSV trade journal.
//!
//! Rows are appended without a header to files under the journal directory
//! (created on first write). Journaling is best effort: a failed write is
//! logged and the trading path carries on.

use chrono::{DateTime, NaiveDate, Utc};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TradeJournal {
    dir: PathBuf,
}

impl TradeJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one record to `file`, creating the directory and file as needed
    pub fn append<I, S>(&self, file: &str, row: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        std::fs::create_dir_all(&self.dir)?;
        let handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(handle);
        writer.write_record(row)?;
        writer.flush()?;
        Ok(())
    }

    /// `append`, logging instead of failing
    pub fn record<I, S>(&self, file: &str, row: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        if let Err(e) = self.append(file, row) {
            tracing::warn!("Failed to write journal row to {}: {}", file, e);
        }
    }

    /// Entry submission: time, symbol, qty, limit, take-profit, stop, order id
    pub fn record_entry(
        &self,
        at: DateTime<Utc>,
        session: NaiveDate,
        symbol: &str,
        qty: u64,
        limit: f64,
        take_profit: f64,
        stop_loss: f64,
        order_id: &str,
    ) {
        self.record(
            &entry_log_name(session),
            [
                at.to_rfc3339(),
                symbol.to_string(),
                qty.to_string(),
                format!("{:.2}", limit),
                format!("{:.2}", take_profit),
                format!("{:.2}", stop_loss),
                order_id.to_string(),
            ],
        );
    }

    /// Live-loop event: time, symbol, event kind, detail
    pub fn record_event(
        &self,
        at: DateTime<Utc>,
        session: NaiveDate,
        symbol: &str,
        event: &str,
        detail: &str,
    ) {
        self.record(
            &live_log_name(session),
            [at.to_rfc3339().as_str(), symbol, event, detail],
        );
    }

    /// Day-end close: time, symbol, qty, closing side, order id
    pub fn record_close(
        &self,
        at: DateTime<Utc>,
        session: NaiveDate,
        symbol: &str,
        qty: u64,
        side: &str,
        order_id: &str,
    ) {
        self.record(
            &close_log_name(session),
            [at.to_rfc3339().as_str(), symbol, qty.to_string().as_str(), side, order_id],
        );
    }
}

pub fn entry_log_name(date: NaiveDate) -> String {
    format!("entry_log_{}.csv", date.format("%Y%m%d"))
}

pub fn live_log_name(date: NaiveDate) -> String {
    format!("live_log_{}.csv", date.format("%Y%m%d"))
}

pub fn close_log_name(date: NaiveDate) -> String {
    format!("close_log_{}.csv", date.format("%Y%m%d"))
}
