//! Partition typed rows into per-pack groups
//!
//! Group order follows first appearance in the file and rows keep their file
//! order inside each group. Order matters downstream: the field mapper takes
//! the booked-in date from the first row of a group and the analysis date
//! from the last.

use std::collections::HashMap;

use crate::columns::ANCHOR_FIELD;
use crate::models::{Group, TypedRow};

/// Output of grouping: the groups plus the rows that could not be grouped
/// because they carry no pack reference.
#[derive(Debug, Default)]
pub struct GroupedRows {
    pub groups: Vec<Group>,
    pub dropped: Vec<TypedRow>,
}

/// Group rows by their pack reference, preserving first-seen group order.
pub fn group_rows(rows: Vec<TypedRow>) -> GroupedRows {
    let mut grouped = GroupedRows::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let key = match row.text(ANCHOR_FIELD) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                grouped.dropped.push(row);
                continue;
            },
        };

        match index.get(&key) {
            Some(&slot) => grouped.groups[slot].rows.push(row),
            None => {
                index.insert(key.clone(), grouped.groups.len());
                grouped.groups.push(Group {
                    key,
                    rows: vec![row],
                });
            },
        }
    }

    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;

    fn row(line: u64, pack: Option<&str>) -> TypedRow {
        let mut row = TypedRow {
            line,
            ..Default::default()
        };
        if let Some(pack) = pack {
            row.fields
                .insert(ANCHOR_FIELD.to_string(), FieldValue::Text(pack.to_string()));
        }
        row
    }

    #[test]
    fn test_groups_preserve_first_seen_order() {
        let rows = vec![
            row(2, Some("PK2")),
            row(3, Some("PK1")),
            row(4, Some("PK2")),
            row(5, Some("PK1")),
        ];

        let grouped = group_rows(rows);

        assert_eq!(grouped.groups.len(), 2);
        assert_eq!(grouped.groups[0].key, "PK2");
        assert_eq!(grouped.groups[1].key, "PK1");
        assert!(grouped.dropped.is_empty());
    }

    #[test]
    fn test_rows_keep_file_order_within_group() {
        let rows = vec![row(2, Some("PK1")), row(5, Some("PK1")), row(3, Some("PK1"))];
        let grouped = group_rows(rows);
        let lines: Vec<_> = grouped.groups[0].rows.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![2, 5, 3]);
    }

    #[test]
    fn test_rows_without_pack_reference_are_dropped() {
        let rows = vec![row(2, Some("PK1")), row(3, None), row(4, Some("PK1"))];
        let grouped = group_rows(rows);

        assert_eq!(grouped.groups.len(), 1);
        assert_eq!(grouped.groups[0].rows.len(), 2);
        assert_eq!(grouped.dropped.len(), 1);
        assert_eq!(grouped.dropped[0].line, 3);
    }
}
