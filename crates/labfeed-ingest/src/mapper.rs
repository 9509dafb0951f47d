//! Field mapping and normalization
//!
//! Two steps live here. Typing turns a raw row into a [`TypedRow`] using the
//! column map: cells are cleaned, sentinel tokens dropped, dates and numbers
//! parsed by the field's registered kind. Folding turns one group of
//! long-format rows (one analyte per row) into a single [`LabReport`] via
//! the analyte rule table.
//!
//! Value text is carried through untouched so significant figures survive.

use chrono::NaiveDate;

use crate::columns::{field_spec, ColumnMap, FieldKind};
use crate::models::{FieldValue, Group, LabReport, RawRow, TypedRow};

/// Tokens the lab writes where it has no value.
const SENTINELS: &[&str] = &["", "null", "pending"];

/// Date formats tried in order, day first throughout.
const DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y",
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %b %Y",
    "%d %B %Y",
];

/// Fallback formats for cells that carry a time of day as well.
const DATETIME_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

fn is_sentinel(cell: &str) -> bool {
    SENTINELS.iter().any(|s| cell.eq_ignore_ascii_case(s))
}

/// Parse a date cell.
///
/// Repairs two-digit years first (`01/02/24` becomes `01/02/2024`; `%Y`
/// would otherwise accept the bare `24` as year 24), then tries the known
/// formats, then falls back to date-and-time formats. `None` when nothing
/// fits; dates are never defaulted.
pub fn parse_feed_date(cell: &str) -> Option<NaiveDate> {
    let cell = cell.trim();

    if let Some(repaired) = repair_two_digit_year(cell) {
        if let Ok(date) = NaiveDate::parse_from_str(&repaired, "%d/%m/%Y") {
            return Some(date);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(cell, format) {
            return Some(date);
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(datetime) = chrono::NaiveDateTime::parse_from_str(cell, format) {
            return Some(datetime.date());
        }
    }

    None
}

/// `dd/mm/yy` to `dd/mm/20yy`. The feed never carries last-century dates.
fn repair_two_digit_year(cell: &str) -> Option<String> {
    let parts: Vec<&str> = cell.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let all_digits = parts
        .iter()
        .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if !all_digits || parts[2].len() != 2 {
        return None;
    }
    Some(format!("{}/{}/20{}", parts[0], parts[1], parts[2]))
}

/// Type one raw row through the column map.
///
/// Cells at unmapped positions are ignored; sentinel cells and cells that
/// fail their kind's parse produce no entry at all.
pub fn type_row(raw: &RawRow, map: &ColumnMap) -> TypedRow {
    let mut row = TypedRow {
        line: raw.line,
        raw: raw.cells.clone(),
        ..Default::default()
    };

    for (&position, name) in &map.accepted {
        let cell = match raw.cells.get(position) {
            Some(cell) if !is_sentinel(cell) => cell,
            _ => continue,
        };

        let kind = field_spec(name).map(|spec| spec.kind).unwrap_or(FieldKind::Text);
        let value = match kind {
            FieldKind::Text => Some(FieldValue::Text(cell.clone())),
            FieldKind::Number => cell.parse::<f64>().ok().map(FieldValue::Number),
            FieldKind::Date => parse_feed_date(cell).map(FieldValue::Date),
        };

        if let Some(value) = value {
            row.fields.insert(name.clone(), value);
        }
    }

    row
}

/// Where a sample was taken, used to split shared analyte labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointFilter {
    Any,
    Main,
    System,
}

/// One row of the analyte rule table.
#[derive(Debug, Clone, Copy)]
pub struct AnalyteRule {
    pub field: &'static str,
    /// Every keyword must appear in the lowercased variable label
    pub keywords: &'static [&'static str],
    pub point: PointFilter,
}

/// First matching rule wins. `sulphate` stays ahead of the `ph` rule
/// because "sulphate" contains "ph".
pub const ANALYTE_RULES: &[AnalyteRule] = &[
    AnalyteRule {
        field: "sulphate_result",
        keywords: &["sulphate"],
        point: PointFilter::Any,
    },
    AnalyteRule {
        field: "chloride_result",
        keywords: &["chloride"],
        point: PointFilter::Any,
    },
    AnalyteRule {
        field: "iron_result",
        keywords: &["iron"],
        point: PointFilter::Any,
    },
    AnalyteRule {
        field: "copper_result",
        keywords: &["copper"],
        point: PointFilter::Any,
    },
    AnalyteRule {
        field: "nitrite_result",
        keywords: &["nitrite"],
        point: PointFilter::Any,
    },
    AnalyteRule {
        field: "molybdate_result",
        keywords: &["molybd"],
        point: PointFilter::Any,
    },
    AnalyteRule {
        field: "glycol_result",
        keywords: &["glycol"],
        point: PointFilter::Any,
    },
    AnalyteRule {
        field: "mains_cond_result",
        keywords: &["cond"],
        point: PointFilter::Main,
    },
    AnalyteRule {
        field: "system_cond_result",
        keywords: &["cond"],
        point: PointFilter::System,
    },
    AnalyteRule {
        field: "ph_result",
        keywords: &["ph", "lab"],
        point: PointFilter::Any,
    },
];

/// Find the analyte field for a variable label and sample point.
///
/// Labels matching no rule are simply not reportable; that is not an error.
pub fn match_analyte(label: &str, sample_point: &str) -> Option<&'static str> {
    let label = label.to_lowercase();
    let point = sample_point.to_lowercase();

    ANALYTE_RULES
        .iter()
        .find(|rule| {
            rule.keywords.iter().all(|k| label.contains(k))
                && match rule.point {
                    PointFilter::Any => true,
                    PointFilter::Main => point.contains("main"),
                    PointFilter::System => point.contains("system"),
                }
        })
        .map(|rule| rule.field)
}

/// Fold one group into a report.
///
/// Scalar fields take the first value seen. The booked-in date comes from
/// the earliest row carrying one, the analysis date from the latest.
/// Analyte rows assign through the rule table; a later row for the same
/// analyte wins. Nitrite and glycol default to "0" because the lab omits
/// them when not measured.
pub fn fold_group(group: &Group) -> LabReport {
    let mut report = LabReport::new(&group.key);
    fold_group_into(&mut report, group);
    report
}

/// Continue folding rows into an existing report.
///
/// The chunked driver uses this when a pack straddles a chunk boundary:
/// scalar fields already set keep their first value, analytes keep
/// last-row-wins, and the report timestamp refreshes to the current pass.
pub fn fold_group_into(report: &mut LabReport, group: &Group) {
    report.reported_at = chrono::Utc::now();

    for row in &group.rows {
        if report.site_reference.is_none() {
            report.site_reference = row.text("site_reference").map(str::to_string);
        }
        if report.booked_in_date.is_none() {
            report.booked_in_date = row.date("date_sent");
        }
        if report.installation_date.is_none() {
            report.installation_date = row.date("date_installed");
        }
        if let Some(date) = row.date("date_tested") {
            report.analysis_date = Some(date);
        }
        if report.dilution_factor.is_none() {
            report.dilution_factor = row.number("dilution_factor");
        }
        if report.approved_by.is_none() {
            report.approved_by = row.text("approved_by").map(str::to_string);
        }

        let label = row.text("variable");
        let value = row.text("value");
        let point = row.text("sample_point").unwrap_or("");
        if let (Some(label), Some(value)) = (label, value) {
            if let Some(field) = match_analyte(label, point) {
                report.set_analyte(field, value.to_string());
            }
        }
    }

    if report.nitrite_result.is_none() {
        report.nitrite_result = Some("0".to_string());
    }
    if report.glycol_result.is_none() {
        report.glycol_result = Some("0".to_string());
    }
}
