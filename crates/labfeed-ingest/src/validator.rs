//! Report validation
//!
//! Pure and total: every report gets an outcome, nothing stops at the first
//! problem, nothing here touches a store or a socket. A group is accepted or
//! rejected whole.

use crate::models::LabReport;

/// One field-level problem with a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Outcome of validating one report.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Valid(LabReport),
    Invalid {
        report: LabReport,
        errors: Vec<FieldError>,
    },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }
}

/// A value that counts as an actual measurement: present, not a zero in any
/// spelling, not a pending marker.
fn is_live_value(value: &str) -> bool {
    if value.is_empty() || value.eq_ignore_ascii_case("pending") {
        return false;
    }
    match value.parse::<f64>() {
        Ok(number) => number != 0.0,
        Err(_) => true,
    }
}

/// Validate a folded report.
///
/// Required fields must be present and at least one analyte must carry a
/// live value, otherwise the whole pack is rejected.
pub fn validate(report: LabReport) -> ValidationOutcome {
    let mut errors = Vec::new();

    if report.pack_reference.trim().is_empty() {
        errors.push(FieldError::new("pack_reference", "Pack reference is required"));
    }

    let has_live_analyte = report
        .analytes()
        .iter()
        .any(|(_, value)| value.is_some_and(is_live_value));
    if !has_live_analyte {
        errors.push(FieldError::new(
            "results",
            "No reportable analyte values in pack",
        ));
    }

    if errors.is_empty() {
        ValidationOutcome::Valid(report)
    } else {
        ValidationOutcome::Invalid { report, errors }
    }
}
