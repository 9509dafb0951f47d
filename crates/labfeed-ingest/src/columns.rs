//! Header mapping against the known-field registry
//!
//! A header cell maps to a field when its normalized form matches the field
//! name or one of its synonyms, and the submitter's access level is allowed
//! to write that field. Everything else lands in the rejected map with its
//! raw text so notices can show what was ignored.
//!
//! The anchor field is special: without it no row can be attributed to a
//! pack, so its absence is the one fatal mapping error.

use labfeed_common::{FeedError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::AccessLevel;

/// Field every row must be attributable to. Files whose header does not
/// yield this field are quarantined whole.
pub const ANCHOR_FIELD: &str = "pack_reference";

/// Column ordering assumed for files declared headerless.
pub const DEFAULT_COLUMNS: &[&str] = &[
    "pack_reference",
    "site_reference",
    "variable",
    "value",
    "sample_point",
    "date_sent",
    "date_installed",
    "date_tested",
];

/// How the first line of a file is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HeaderMode {
    /// First line is a header row to be mapped against the registry
    #[default]
    Detect,
    /// No header; columns follow [`DEFAULT_COLUMNS`]
    Fixed,
}

/// Shape a cell is cleaned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Date,
}

/// One entry of the known-field registry.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub write_level: AccessLevel,
    pub synonyms: &'static [&'static str],
}

/// Every field a feed file may carry. Extend here, nowhere else.
pub const FIELD_REGISTRY: &[FieldSpec] = &[
    FieldSpec {
        name: "pack_reference",
        kind: FieldKind::Text,
        write_level: AccessLevel::User,
        synonyms: &[],
    },
    FieldSpec {
        name: "site_reference",
        kind: FieldKind::Text,
        write_level: AccessLevel::User,
        synonyms: &[],
    },
    FieldSpec {
        name: "variable",
        kind: FieldKind::Text,
        write_level: AccessLevel::User,
        synonyms: &[],
    },
    FieldSpec {
        name: "value",
        kind: FieldKind::Text,
        write_level: AccessLevel::User,
        synonyms: &[],
    },
    FieldSpec {
        name: "sample_point",
        kind: FieldKind::Text,
        write_level: AccessLevel::User,
        synonyms: &[],
    },
    FieldSpec {
        name: "date_sent",
        kind: FieldKind::Date,
        write_level: AccessLevel::User,
        synonyms: &["dt_sent"],
    },
    FieldSpec {
        name: "date_installed",
        kind: FieldKind::Date,
        write_level: AccessLevel::User,
        synonyms: &["dt_installed"],
    },
    FieldSpec {
        name: "date_tested",
        kind: FieldKind::Date,
        write_level: AccessLevel::User,
        synonyms: &[],
    },
    FieldSpec {
        name: "dilution_factor",
        kind: FieldKind::Number,
        write_level: AccessLevel::Admin,
        synonyms: &[],
    },
    FieldSpec {
        name: "approved_by",
        kind: FieldKind::Text,
        write_level: AccessLevel::Admin,
        synonyms: &[],
    },
];

/// Result of mapping a header row: which positions feed which fields, and
/// which positions were ignored (with the raw text that was there).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMap {
    pub accepted: BTreeMap<usize, String>,
    pub rejected: BTreeMap<usize, String>,
}

impl ColumnMap {
    /// Width of the original header row, used to check row cell counts.
    pub fn width(&self) -> usize {
        self.accepted
            .keys()
            .chain(self.rejected.keys())
            .max()
            .map(|max| max + 1)
            .unwrap_or(0)
    }

    /// Accepted field names by column position, with blanks at rejected
    /// positions. This is the header snapshot notices carry.
    pub fn accepted_names(&self) -> Vec<String> {
        (0..self.width())
            .map(|position| self.accepted.get(&position).cloned().unwrap_or_default())
            .collect()
    }
}

/// Lowercase, trim, inner whitespace runs to single underscores.
pub fn normalize_header_cell(cell: &str) -> String {
    cell.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Look a normalized header cell up in the registry, honoring synonyms.
pub fn lookup_field(normalized: &str) -> Option<&'static FieldSpec> {
    FIELD_REGISTRY
        .iter()
        .find(|spec| spec.name == normalized || spec.synonyms.contains(&normalized))
}

/// Look a canonical field name up in the registry.
pub fn field_spec(name: &str) -> Option<&'static FieldSpec> {
    FIELD_REGISTRY.iter().find(|spec| spec.name == name)
}

/// Map a header row against the registry for the given access level.
///
/// Duplicate header cells keep the first occurrence; repeats are rejected.
/// Fails only when the anchor field is absent from the accepted set.
pub fn map_header(cells: &[String], access: AccessLevel) -> Result<ColumnMap> {
    let mut map = ColumnMap::default();

    for (position, cell) in cells.iter().enumerate() {
        let normalized = normalize_header_cell(cell);
        let accepted = lookup_field(&normalized)
            .filter(|spec| access >= spec.write_level)
            .map(|spec| spec.name.to_string())
            .filter(|name| !map.accepted.values().any(|existing| existing == name));

        match accepted {
            Some(name) => {
                map.accepted.insert(position, name);
            },
            None => {
                map.rejected.insert(position, cell.clone());
            },
        }
    }

    if !map.accepted.values().any(|name| name == ANCHOR_FIELD) {
        return Err(FeedError::MissingAnchorColumn(ANCHOR_FIELD.to_string()));
    }

    Ok(map)
}

/// Column map for headerless files: every default column accepted in order.
pub fn fixed_map() -> ColumnMap {
    let mut map = ColumnMap::default();
    for (position, name) in DEFAULT_COLUMNS.iter().enumerate() {
        map.accepted.insert(position, name.to_string());
    }
    map
}

/// Resolve the column map for a freshly opened file.
///
/// Fixed mode never looks at the file. Detect mode maps the cached header;
/// a file with no header row at all fails the same way as one missing the
/// anchor column.
pub fn resolve_header(
    header: Option<&[String]>,
    mode: HeaderMode,
    access: AccessLevel,
) -> Result<ColumnMap> {
    match mode {
        HeaderMode::Fixed => Ok(fixed_map()),
        HeaderMode::Detect => match header {
            Some(cells) => map_header(cells, access),
            None => Err(FeedError::MissingAnchorColumn(ANCHOR_FIELD.to_string())),
        },
    }
}
