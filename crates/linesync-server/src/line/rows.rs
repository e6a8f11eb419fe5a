//! Stored row shapes and the views sent to dashboards.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Sequence status: waiting in the queue.
pub const STATUS_QUEUE: u8 = 0;
/// Sequence status: label printed, standing by at the station.
pub const STATUS_PRINTED: u8 = 1;
/// Sequence status: workpiece left the station.
pub const STATUS_COMPLETE: u8 = 2;
/// Sequence status: parked manually.
pub const STATUS_PARKED: u8 = 3;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATETIME_MILLIS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

fn format_datetime(time: Option<DateTime<Utc>>) -> Option<String> {
    time.map(|t| t.format(DATETIME_FORMAT).to_string())
}

/// Row of `TB_R_SEQUENCE_BATTERY`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SequenceRow {
    pub fid: u64,
    pub fid_adjust: i64,
    pub fstatus: u8,
    pub ftype_battery: String,
    pub fmodel_battery: String,
    pub fseq_date: Option<NaiveDate>,
    pub ftime_received: Option<DateTime<Utc>>,
    pub ftime_printed: Option<DateTime<Utc>>,
    pub ftime_completed: Option<DateTime<Utc>>,
    pub falc_data: Option<String>,
}

/// Sequence as shown on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SequenceView {
    pub fid: u64,
    pub fid_adjust: i64,
    pub fstatus: u8,
    pub ftype_battery: String,
    pub fmodel_battery: String,
    pub fseq_date: Option<String>,
    pub ftime_received: Option<String>,
    pub ftime_printed: Option<String>,
    pub ftime_completed: Option<String>,
    /// `ALC` when ALC data was received, `INJECT MANUAL` otherwise.
    pub falc_data: String,
}

impl From<&SequenceRow> for SequenceView {
    fn from(row: &SequenceRow) -> Self {
        let alc = row
            .falc_data
            .as_deref()
            .is_some_and(|data| !data.trim().is_empty());
        Self {
            fid: row.fid,
            fid_adjust: row.fid_adjust,
            fstatus: row.fstatus,
            ftype_battery: row.ftype_battery.clone(),
            fmodel_battery: row.fmodel_battery.clone(),
            fseq_date: format_date(row.fseq_date),
            ftime_received: format_datetime(row.ftime_received),
            ftime_printed: format_datetime(row.ftime_printed),
            ftime_completed: format_datetime(row.ftime_completed),
            falc_data: if alc { "ALC" } else { "INJECT MANUAL" }.to_string(),
        }
    }
}

/// The sequence board: what is being built, what is next, done and parked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceBoard {
    pub current: Option<SequenceView>,
    pub queue: Vec<SequenceView>,
    pub completed: Vec<SequenceView>,
    pub parked: Vec<SequenceView>,
}

/// Row of `TB_R_ANDON_GLOBAL`: one named KPI value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct GlobalRow {
    pub fname: String,
    pub fvalue: f64,
    pub fupdate: DateTime<Utc>,
}

/// Line KPI summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AndonSummary {
    pub target: f64,
    pub plan: f64,
    pub act_ckd: f64,
    pub act_assy: f64,
    pub eff: f64,
    pub takt_time: f64,
    pub updated_at: Option<String>,
}

impl AndonSummary {
    /// Fold KPI rows into a summary; unknown names are ignored.
    pub fn from_rows(rows: &[GlobalRow]) -> Self {
        let mut summary = Self::default();
        for row in rows {
            let slot = match row.fname.as_str() {
                "TARGET" => &mut summary.target,
                "PLAN" => &mut summary.plan,
                "ACT_CKD" => &mut summary.act_ckd,
                "ACT_ASSY" => &mut summary.act_assy,
                "EFF" => &mut summary.eff,
                "TAKTIME" => &mut summary.takt_time,
                _ => continue,
            };
            *slot = row.fvalue;
        }
        summary.updated_at = format_datetime(rows.iter().map(|r| r.fupdate).max());
        summary
    }
}

/// Row of `TB_R_ANDON_STATUS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CallRow {
    pub fid: u64,
    pub station: String,
    pub call_type: String,
    pub fvalue: i32,
}

/// An active andon call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AndonCall {
    pub station: String,
    pub call_type: String,
}

/// Row of `TB_R_POS_STATUS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ProcessRow {
    pub fid: u64,
    pub station: String,
    pub status: String,
    pub source: String,
    pub fvalue: i32,
}

/// An active process status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub station: String,
    pub status: String,
    pub source: String,
}

/// Row of `TB_R_DOWNTIME_LOG`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DowntimeRow {
    pub fid: u64,
    pub station: String,
    pub total_downtime: i64,
    pub duration_minute: Option<i64>,
}

/// Downtime of one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DowntimeEntry {
    pub station: String,
    pub times: i64,
    pub minutes: i64,
}

/// Row of `TB_H_PRINT_LOG`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PrintLogRow {
    pub fid: u64,
    pub print_qrcode: Option<String>,
    pub prod_date: NaiveDate,
    pub fshift: Option<String>,
    pub datetime_modified: Option<DateTime<Utc>>,
    pub datetime_received: Option<DateTime<Utc>>,
    pub fmodel_battery: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Shift {
    Day,
    Night,
}

impl Shift {
    /// Map a stored shift code; anything unrecognised is the day shift.
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("2") | Some("M") | Some("NIGHT") => Shift::Night,
            _ => Shift::Day,
        }
    }
}

/// One printed battery label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintHistory {
    pub id: String,
    pub battery_pack_id: String,
    pub production_date: String,
    pub shift: Shift,
    pub time_print: String,
    pub model_battery: Option<String>,
}

impl From<&PrintLogRow> for PrintHistory {
    fn from(row: &PrintLogRow) -> Self {
        let time_print = row
            .datetime_modified
            .or(row.datetime_received)
            .map(|t| t.format(DATETIME_MILLIS_FORMAT).to_string())
            .unwrap_or_default();
        Self {
            id: row.fid.to_string(),
            battery_pack_id: row
                .print_qrcode
                .clone()
                .unwrap_or_else(|| format!("FID-{}", row.fid)),
            production_date: row.prod_date.format(DATE_FORMAT).to_string(),
            shift: Shift::from_code(row.fshift.as_deref()),
            time_print,
            model_battery: row.fmodel_battery.clone(),
        }
    }
}

/// One page of print history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintHistoryPage {
    pub items: Vec<PrintHistory>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sequence(alc: Option<&str>) -> SequenceRow {
        SequenceRow {
            fid: 7,
            fid_adjust: 3,
            fstatus: STATUS_QUEUE,
            ftype_battery: "LI".into(),
            fmodel_battery: "BATT-48V".into(),
            fseq_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ftime_received: Some(Utc.with_ymd_and_hms(2024, 3, 1, 7, 5, 9).unwrap()),
            ftime_printed: None,
            ftime_completed: None,
            falc_data: alc.map(String::from),
        }
    }

    #[test]
    fn test_sequence_view_formats_fields() {
        let view = SequenceView::from(&sequence(Some("K0-123")));
        assert_eq!(view.fseq_date.as_deref(), Some("2024-03-01"));
        assert_eq!(view.ftime_received.as_deref(), Some("2024-03-01 07:05:09"));
        assert_eq!(view.ftime_printed, None);
        assert_eq!(view.falc_data, "ALC");

        assert_eq!(SequenceView::from(&sequence(Some("  "))).falc_data, "INJECT MANUAL");
        assert_eq!(SequenceView::from(&sequence(None)).falc_data, "INJECT MANUAL");
    }

    #[test]
    fn test_sequence_row_column_names() {
        let value = serde_json::to_value(sequence(None)).unwrap();
        assert_eq!(value["FID"], json!(7));
        assert_eq!(value["FID_ADJUST"], json!(3));
        assert_eq!(value["FMODEL_BATTERY"], json!("BATT-48V"));
    }

    #[test]
    fn test_summary_from_rows() {
        let at = |h| Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap();
        let rows = vec![
            GlobalRow { fname: "TARGET".into(), fvalue: 120.0, fupdate: at(6) },
            GlobalRow { fname: "ACT_ASSY".into(), fvalue: 64.0, fupdate: at(9) },
            GlobalRow { fname: "TAKTIME".into(), fvalue: 3.5, fupdate: at(8) },
            GlobalRow { fname: "NOISE".into(), fvalue: 1.0, fupdate: at(7) },
        ];

        let summary = AndonSummary::from_rows(&rows);
        assert_eq!(summary.target, 120.0);
        assert_eq!(summary.act_assy, 64.0);
        assert_eq!(summary.takt_time, 3.5);
        assert_eq!(summary.plan, 0.0);
        assert_eq!(summary.updated_at.as_deref(), Some("2024-03-01 09:00:00"));

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["ActAssy"], json!(64.0));
        assert_eq!(value["TaktTime"], json!(3.5));

        assert_eq!(AndonSummary::from_rows(&[]).updated_at, None);
    }

    #[test]
    fn test_print_history_mapping() {
        let row = PrintLogRow {
            fid: 42,
            print_qrcode: None,
            prod_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            fshift: Some("M".into()),
            datetime_modified: None,
            datetime_received: Some(Utc.with_ymd_and_hms(2024, 3, 1, 22, 10, 0).unwrap()),
            fmodel_battery: Some("BATT-48V".into()),
        };

        let history = PrintHistory::from(&row);
        assert_eq!(history.id, "42");
        assert_eq!(history.battery_pack_id, "FID-42");
        assert_eq!(history.shift, Shift::Night);
        assert_eq!(history.time_print, "2024-03-01 22:10:00.000");

        let value = serde_json::to_value(&history).unwrap();
        assert_eq!(value["batteryPackId"], json!("FID-42"));
        assert_eq!(value["shift"], json!("NIGHT"));
    }

    #[test]
    fn test_shift_codes() {
        assert_eq!(Shift::from_code(Some("1")), Shift::Day);
        assert_eq!(Shift::from_code(Some("P")), Shift::Day);
        assert_eq!(Shift::from_code(Some("2")), Shift::Night);
        assert_eq!(Shift::from_code(Some("??")), Shift::Day);
        assert_eq!(Shift::from_code(None), Shift::Day);
    }
}
