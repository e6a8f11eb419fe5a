//! Production-line tables over the change-tracked store.
//!
//! Every write goes through [`SledStore::upsert`] so it is picked up by the
//! change pollers of the dashboard topics.

mod rows;

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use linesync_core::{Error, Result, SledStore};

pub use rows::{
    AndonCall, AndonSummary, CallRow, DowntimeEntry, DowntimeRow, GlobalRow, PrintHistory,
    PrintHistoryPage, PrintLogRow, ProcessRow, ProcessStatus, SequenceBoard, SequenceRow,
    SequenceView, Shift, STATUS_COMPLETE, STATUS_PARKED, STATUS_PRINTED, STATUS_QUEUE,
};

pub const SEQUENCE_TABLE: &str = "TB_R_SEQUENCE_BATTERY";
pub const GLOBAL_TABLE: &str = "TB_R_ANDON_GLOBAL";
pub const CALL_TABLE: &str = "TB_R_ANDON_STATUS";
pub const PROCESS_TABLE: &str = "TB_R_POS_STATUS";
pub const DOWNTIME_TABLE: &str = "TB_R_DOWNTIME_LOG";
pub const PRINT_LOG_TABLE: &str = "TB_H_PRINT_LOG";

/// Queue entries shown on the board.
pub const MAX_QUEUE_SIZE: usize = 500;
/// Completed entries shown on the board.
pub const MAX_COMPLETED_SIZE: usize = 100;

/// Row key that sorts numerically.
fn row_key(fid: u64) -> String {
    format!("{:020}", fid)
}

/// Typed access to the line tables.
#[derive(Clone)]
pub struct LineStore {
    store: Arc<SledStore>,
}

impl LineStore {
    pub fn new(store: Arc<SledStore>) -> Self {
        Self { store }
    }

    /// The underlying change-tracked store.
    pub fn store(&self) -> &Arc<SledStore> {
        &self.store
    }

    fn rows<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        self.store
            .scan(table)?
            .into_iter()
            .map(|(_, value)| {
                serde_json::from_value(value).map_err(|e| Error::Deserialization(e.to_string()))
            })
            .collect()
    }

    fn row<T: DeserializeOwned>(&self, table: &str, key: &str) -> Result<Option<T>> {
        self.store
            .get(table, key)?
            .map(|value| {
                serde_json::from_value(value).map_err(|e| Error::Deserialization(e.to_string()))
            })
            .transpose()
    }

    fn put<T: Serialize>(&self, table: &str, key: &str, row: &T) -> Result<u64> {
        let value = serde_json::to_value(row)?;
        self.store.upsert(table, key, &value)
    }

    fn next_fid(&self) -> Result<u64> {
        Ok(self.store.next_id()? + 1)
    }

    // ------------------------------------------------------------------
    // Sequences
    // ------------------------------------------------------------------

    /// Current sequence, queue, completed and parked lists.
    pub fn sequence_board(&self) -> Result<SequenceBoard> {
        let mut rows: Vec<SequenceRow> = self.rows(SEQUENCE_TABLE)?;
        rows.sort_by_key(|row| (row.fid_adjust, row.fid));

        let current = rows.iter().find(|row| {
            row.fstatus == STATUS_QUEUE
                || (row.fstatus == STATUS_PRINTED && row.ftime_printed.is_some())
        });
        let current_fid = current.map(|row| row.fid);

        let queue = rows
            .iter()
            .filter(|row| row.fstatus == STATUS_QUEUE && Some(row.fid) != current_fid)
            .take(MAX_QUEUE_SIZE)
            .map(SequenceView::from)
            .collect();

        let mut completed: Vec<&SequenceRow> =
            rows.iter().filter(|row| row.fstatus == STATUS_COMPLETE).collect();
        completed.sort_by(|a, b| b.ftime_completed.cmp(&a.ftime_completed));
        let completed = completed
            .into_iter()
            .take(MAX_COMPLETED_SIZE)
            .map(SequenceView::from)
            .collect();

        let parked = rows
            .iter()
            .filter(|row| row.fstatus == STATUS_PARKED)
            .map(SequenceView::from)
            .collect();

        Ok(SequenceBoard {
            current: current.map(SequenceView::from),
            queue,
            completed,
            parked,
        })
    }

    pub fn sequence(&self, fid: u64) -> Result<Option<SequenceRow>> {
        self.row(SEQUENCE_TABLE, &row_key(fid))
    }

    pub fn put_sequence(&self, row: &SequenceRow) -> Result<u64> {
        self.put(SEQUENCE_TABLE, &row_key(row.fid), row)
    }

    /// Append a new sequence at the end of the queue.
    pub fn create_sequence(&self, type_battery: &str, model_battery: &str) -> Result<SequenceRow> {
        let rows: Vec<SequenceRow> = self.rows(SEQUENCE_TABLE)?;
        let last_adjust = rows
            .iter()
            .filter(|row| row.fstatus == STATUS_QUEUE)
            .map(|row| row.fid_adjust)
            .max()
            .unwrap_or(0);

        let now = Utc::now();
        let row = SequenceRow {
            fid: self.next_fid()?,
            fid_adjust: last_adjust + 1,
            fstatus: STATUS_QUEUE,
            ftype_battery: type_battery.to_string(),
            fmodel_battery: model_battery.to_string(),
            fseq_date: Some(now.date_naive()),
            ftime_received: Some(now),
            ftime_printed: None,
            ftime_completed: None,
            falc_data: None,
        };
        self.put_sequence(&row)?;
        Ok(row)
    }

    /// Move a sequence to the parked list. Returns `None` if it doesn't exist.
    pub fn park_sequence(&self, fid: u64) -> Result<Option<SequenceRow>> {
        let Some(mut row) = self.sequence(fid)? else {
            return Ok(None);
        };
        row.fstatus = STATUS_PARKED;
        self.put_sequence(&row)?;
        Ok(Some(row))
    }

    // ------------------------------------------------------------------
    // Andon
    // ------------------------------------------------------------------

    pub fn summary(&self) -> Result<AndonSummary> {
        let rows: Vec<GlobalRow> = self.rows(GLOBAL_TABLE)?;
        Ok(AndonSummary::from_rows(&rows))
    }

    /// Set one KPI value (`TARGET`, `PLAN`, `ACT_CKD`, ...).
    pub fn set_global(&self, name: &str, value: f64) -> Result<u64> {
        let row = GlobalRow {
            fname: name.to_string(),
            fvalue: value,
            fupdate: Utc::now(),
        };
        self.put(GLOBAL_TABLE, name, &row)
    }

    /// Calls with `FVALUE = 1`, in insertion order.
    pub fn active_calls(&self) -> Result<Vec<AndonCall>> {
        let mut rows: Vec<CallRow> = self.rows(CALL_TABLE)?;
        rows.sort_by_key(|row| row.fid);
        Ok(rows
            .into_iter()
            .filter(|row| row.fvalue == 1)
            .map(|row| AndonCall {
                station: row.station,
                call_type: row.call_type,
            })
            .collect())
    }

    /// Raise or clear the call of `call_type` at `station`.
    pub fn set_call(&self, station: &str, call_type: &str, active: bool) -> Result<CallRow> {
        let existing = self
            .rows::<CallRow>(CALL_TABLE)?
            .into_iter()
            .find(|row| row.station == station && row.call_type == call_type);

        let row = match existing {
            Some(mut row) => {
                row.fvalue = i32::from(active);
                row
            }
            None => CallRow {
                fid: self.next_fid()?,
                station: station.to_string(),
                call_type: call_type.to_string(),
                fvalue: i32::from(active),
            },
        };
        self.put(CALL_TABLE, &row_key(row.fid), &row)?;
        Ok(row)
    }

    /// Process statuses with `FVALUE = 1`, in insertion order.
    pub fn active_processes(&self) -> Result<Vec<ProcessStatus>> {
        let mut rows: Vec<ProcessRow> = self.rows(PROCESS_TABLE)?;
        rows.sort_by_key(|row| row.fid);
        Ok(rows
            .into_iter()
            .filter(|row| row.fvalue == 1)
            .map(|row| ProcessStatus {
                station: row.station,
                status: row.status,
                source: row.source,
            })
            .collect())
    }

    pub fn put_process(&self, row: &ProcessRow) -> Result<u64> {
        self.put(PROCESS_TABLE, &row_key(row.fid), row)
    }

    pub fn downtime(&self) -> Result<Vec<DowntimeEntry>> {
        let mut rows: Vec<DowntimeRow> = self.rows(DOWNTIME_TABLE)?;
        rows.sort_by_key(|row| row.fid);
        Ok(rows
            .into_iter()
            .map(|row| DowntimeEntry {
                station: row.station,
                times: row.total_downtime,
                minutes: row.duration_minute.unwrap_or(0),
            })
            .collect())
    }

    pub fn put_downtime(&self, row: &DowntimeRow) -> Result<u64> {
        self.put(DOWNTIME_TABLE, &row_key(row.fid), row)
    }

    // ------------------------------------------------------------------
    // Print history
    // ------------------------------------------------------------------

    pub fn put_print_log(&self, row: &PrintLogRow) -> Result<u64> {
        self.put(PRINT_LOG_TABLE, &row_key(row.fid), row)
    }

    /// Labels produced between `from` and `to` (both inclusive), newest first.
    ///
    /// `page` starts at 1.
    pub fn print_history(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        page: usize,
        limit: usize,
    ) -> Result<PrintHistoryPage> {
        let mut rows: Vec<PrintLogRow> = self
            .rows::<PrintLogRow>(PRINT_LOG_TABLE)?
            .into_iter()
            .filter(|row| row.prod_date >= from && row.prod_date <= to)
            .collect();
        rows.sort_by(|a, b| {
            b.datetime_modified
                .cmp(&a.datetime_modified)
                .then(b.fid.cmp(&a.fid))
        });

        let page = page.max(1);
        let items = rows
            .iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .map(PrintHistory::from)
            .collect();

        Ok(PrintHistoryPage {
            items,
            total: rows.len(),
            page,
            limit,
        })
    }
}
