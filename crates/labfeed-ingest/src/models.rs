//! Core data model for the ingestion pipeline
//!
//! Working forms (rows, groups) are ephemeral and live only for one
//! invocation. Records and summaries are serializable because they cross
//! process boundaries (record store, job state, remote sink).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Access level of the identity a file was submitted under.
///
/// Ordering matters: a field is writable when the submitter's level is at
/// least the field's write level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    User,
    Admin,
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessLevel::User => write!(f, "user"),
            AccessLevel::Admin => write!(f, "admin"),
        }
    }
}

/// Identity a run is performed under, stamped into notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitter {
    pub name: String,
    pub access: AccessLevel,
}

impl Submitter {
    pub fn new(name: impl Into<String>, access: AccessLevel) -> Self {
        Self {
            name: name.into(),
            access,
        }
    }

    /// Identity used by the automated intake worker.
    pub fn system() -> Self {
        Self::new("intake-worker", AccessLevel::User)
    }
}

/// One line of a CSV file as read, before any field mapping.
///
/// `parse_error` is set when the line was structurally malformed (bad
/// quoting, wrong cell count against the header). Flagged rows are kept so
/// the caller can report them; they never abort the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRow {
    /// 1-based physical line number in the source file
    pub line: u64,
    pub cells: Vec<String>,
    pub parse_error: Option<String>,
}

impl RawRow {
    pub fn new(line: u64, cells: Vec<String>) -> Self {
        Self {
            line,
            cells,
            parse_error: None,
        }
    }

    pub fn flagged(line: u64, cells: Vec<String>, error: impl Into<String>) -> Self {
        Self {
            line,
            cells,
            parse_error: Some(error.into()),
        }
    }

    pub fn is_flagged(&self) -> bool {
        self.parse_error.is_some()
    }
}

/// A cell value after cleaning and typing.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

/// A row after header mapping and value typing.
///
/// Only accepted columns appear in `fields`; absent and sentinel cells are
/// not inserted at all. The raw cells ride along for notice snapshots.
#[derive(Debug, Clone, Default)]
pub struct TypedRow {
    pub line: u64,
    pub fields: BTreeMap<String, FieldValue>,
    pub raw: Vec<String>,
}

impl TypedRow {
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(FieldValue::as_text)
    }

    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        self.fields.get(field).and_then(FieldValue::as_date)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(FieldValue::as_number)
    }
}

/// All rows sharing one pack reference, in file order.
#[derive(Debug, Clone)]
pub struct Group {
    pub key: String,
    pub rows: Vec<TypedRow>,
}

/// One laboratory report, folded from a group of long-format rows.
///
/// Analyte results keep the value text exactly as received so that
/// significant figures survive (a "7.20" stays "7.20").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabReport {
    pub pack_reference: String,
    pub site_reference: Option<String>,
    /// Date the pack was sent in, taken from the first row of the group
    pub booked_in_date: Option<NaiveDate>,
    pub installation_date: Option<NaiveDate>,
    /// Date of analysis, taken from the last row of the group
    pub analysis_date: Option<NaiveDate>,
    /// Always the processing time, never a value from the file
    pub reported_at: DateTime<Utc>,
    pub ph_result: Option<String>,
    pub mains_cond_result: Option<String>,
    pub system_cond_result: Option<String>,
    pub chloride_result: Option<String>,
    pub sulphate_result: Option<String>,
    pub iron_result: Option<String>,
    pub copper_result: Option<String>,
    pub nitrite_result: Option<String>,
    pub molybdate_result: Option<String>,
    pub glycol_result: Option<String>,
    pub dilution_factor: Option<f64>,
    pub approved_by: Option<String>,
}

impl LabReport {
    pub fn new(pack_reference: impl Into<String>) -> Self {
        Self {
            pack_reference: pack_reference.into(),
            site_reference: None,
            booked_in_date: None,
            installation_date: None,
            analysis_date: None,
            reported_at: Utc::now(),
            ph_result: None,
            mains_cond_result: None,
            system_cond_result: None,
            chloride_result: None,
            sulphate_result: None,
            iron_result: None,
            copper_result: None,
            nitrite_result: None,
            molybdate_result: None,
            glycol_result: None,
            dilution_factor: None,
            approved_by: None,
        }
    }

    /// Analyte fields by name, in report order.
    pub fn analytes(&self) -> [(&'static str, Option<&str>); 10] {
        [
            ("ph_result", self.ph_result.as_deref()),
            ("mains_cond_result", self.mains_cond_result.as_deref()),
            ("system_cond_result", self.system_cond_result.as_deref()),
            ("chloride_result", self.chloride_result.as_deref()),
            ("sulphate_result", self.sulphate_result.as_deref()),
            ("iron_result", self.iron_result.as_deref()),
            ("copper_result", self.copper_result.as_deref()),
            ("nitrite_result", self.nitrite_result.as_deref()),
            ("molybdate_result", self.molybdate_result.as_deref()),
            ("glycol_result", self.glycol_result.as_deref()),
        ]
    }

    /// Assign an analyte result by field name. Returns false for a name
    /// that is not an analyte field.
    pub fn set_analyte(&mut self, field: &str, value: String) -> bool {
        let slot = match field {
            "ph_result" => &mut self.ph_result,
            "mains_cond_result" => &mut self.mains_cond_result,
            "system_cond_result" => &mut self.system_cond_result,
            "chloride_result" => &mut self.chloride_result,
            "sulphate_result" => &mut self.sulphate_result,
            "iron_result" => &mut self.iron_result,
            "copper_result" => &mut self.copper_result,
            "nitrite_result" => &mut self.nitrite_result,
            "molybdate_result" => &mut self.molybdate_result,
            "glycol_result" => &mut self.glycol_result,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

/// A report as persisted by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub id: Uuid,
    /// Numeric key of the site in the downstream system. Zero until a
    /// previously stored report supplies the real value.
    pub site_key: i64,
    pub report: LabReport,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Counters for one file (or the chunks of one upload so far).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Data rows read, including flagged ones
    pub rows_seen: i64,
    /// All-whitespace rows, counted but never forwarded
    pub empty_lines: i64,
    /// Notices recorded: flagged rows, dropped rows, rejected groups
    pub errors: i64,
    pub groups_total: i64,
    pub committed: i64,
    pub skipped: i64,
    pub failed: i64,
    /// Set when a file-level error (missing anchor column) ended the job
    pub fatal: Option<String>,
}

impl JobSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_committed(&mut self) {
        self.committed += 1;
    }

    pub fn inc_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn inc_failed(&mut self) {
        self.failed += 1;
    }

    /// A clean pass: every group committed, nothing rejected, nothing
    /// flagged. Only clean passes archive the file.
    pub fn is_clean(&self) -> bool {
        self.skipped == 0 && self.failed == 0 && self.errors == 0 && self.fatal.is_none()
    }

    /// Merge counters from another summary into this one.
    pub fn merge(self, other: Self) -> Self {
        Self {
            rows_seen: self.rows_seen + other.rows_seen,
            empty_lines: self.empty_lines + other.empty_lines,
            errors: self.errors + other.errors,
            groups_total: self.groups_total + other.groups_total,
            committed: self.committed + other.committed,
            skipped: self.skipped + other.skipped,
            failed: self.failed + other.failed,
            fatal: other.fatal.or(self.fatal),
        }
    }
}
