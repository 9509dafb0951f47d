//! Streaming CSV reader with byte-offset resume
//!
//! Rows come out lazily as [`RawRow`]s with every cell trimmed. The reader
//! never fails on malformed content: a structurally bad row is returned
//! flagged and the caller decides what to do with it. Only real I/O errors
//! propagate.
//!
//! A reader can start from byte 0 (reading and caching the header when the
//! file declares one) or from a saved byte offset, in which case the cached
//! column map from the first pass supplies the expected row width.

use labfeed_common::{FeedError, Result};
use std::fs::File;
use std::path::Path;

use crate::columns::{HeaderMode, DEFAULT_COLUMNS};
use crate::models::RawRow;

/// Reader over one feed file.
pub struct FeedReader {
    reader: csv::Reader<File>,
    header: Option<Vec<String>>,
    expected_width: Option<usize>,
    empty_lines: u64,
    eof: bool,
}

impl FeedReader {
    /// Open a file from the beginning.
    ///
    /// In [`HeaderMode::Detect`] the first record is consumed and cached as
    /// the header. In [`HeaderMode::Fixed`] every line is data and rows are
    /// checked against the default column count.
    pub fn open(path: &Path, mode: HeaderMode) -> Result<Self> {
        let file = File::open(path)?;
        let reader = csv_builder().from_reader(file);
        let mut feed = Self {
            reader,
            header: None,
            expected_width: match mode {
                HeaderMode::Detect => None,
                HeaderMode::Fixed => Some(DEFAULT_COLUMNS.len()),
            },
            empty_lines: 0,
            eof: false,
        };

        if mode == HeaderMode::Detect {
            let mut record = csv::ByteRecord::new();
            match feed.reader.read_byte_record(&mut record) {
                Ok(true) => {
                    let cells = record_cells(&record);
                    feed.expected_width = Some(cells.len());
                    feed.header = Some(cells);
                },
                Ok(false) => feed.eof = true,
                Err(e) => return Err(convert_csv_error(e)),
            }
        }

        Ok(feed)
    }

    /// Reopen a file at a saved byte offset.
    ///
    /// `line` is the 1-based line number the offset points at, kept so row
    /// line numbers stay accurate across invocations. The header is not
    /// re-read; `expected_width` comes from the caller's cached column map.
    pub fn resume(
        path: &Path,
        offset: u64,
        line: u64,
        expected_width: Option<usize>,
    ) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = csv_builder().from_reader(file);

        let mut position = csv::Position::new();
        position.set_byte(offset);
        position.set_line(line.max(1));
        reader.seek(position).map_err(convert_csv_error)?;

        Ok(Self {
            reader,
            header: None,
            expected_width,
            empty_lines: 0,
            eof: false,
        })
    }

    /// The cached header cells, present only after a `Detect` open.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Byte offset where the next unread record starts.
    pub fn position(&self) -> u64 {
        self.reader.position().byte()
    }

    /// 1-based line number where the next unread record starts.
    pub fn line_cursor(&self) -> u64 {
        self.reader.position().line()
    }

    /// All-whitespace rows seen so far. Counted, never forwarded.
    pub fn empty_lines(&self) -> u64 {
        self.empty_lines
    }

    /// Read the next data row, skipping and counting empty lines.
    pub fn next_row(&mut self) -> Result<Option<RawRow>> {
        if self.eof {
            return Ok(None);
        }

        let mut record = csv::ByteRecord::new();
        loop {
            let start_line = self.reader.position().line();

            match self.reader.read_byte_record(&mut record) {
                Ok(true) => {
                    // The parser silently skips fully blank lines, so their
                    // count is recovered from the line numbers: lines consumed
                    // minus lines the record itself occupies (quoted cells may
                    // span several).
                    let consumed = self.reader.position().line().saturating_sub(start_line);
                    let spanned = 1 + embedded_newlines(&record);
                    let blanks = consumed.saturating_sub(spanned);
                    self.empty_lines += blanks;
                    let line = start_line + blanks;

                    let cells = record_cells(&record);
                    if cells.iter().all(|cell| cell.is_empty()) {
                        self.empty_lines += 1;
                        continue;
                    }

                    if let Some(width) = self.expected_width {
                        if cells.len() != width {
                            let message =
                                format!("Expected {} cells, found {}", width, cells.len());
                            return Ok(Some(RawRow::flagged(line, cells, message)));
                        }
                    }

                    return Ok(Some(RawRow::new(line, cells)));
                },
                Ok(false) => {
                    // Trailing blank lines are consumed while scanning for a
                    // record that is not there.
                    self.empty_lines += self.reader.position().line().saturating_sub(start_line);
                    self.eof = true;
                    return Ok(None);
                },
                Err(e) => {
                    let message = e.to_string();
                    if let csv::ErrorKind::Io(io) = e.into_kind() {
                        return Err(FeedError::Io(io));
                    }
                    return Ok(Some(RawRow::flagged(start_line, Vec::new(), message)));
                },
            }
        }
    }
}

fn csv_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.has_headers(false).flexible(true);
    builder
}

fn record_cells(record: &csv::ByteRecord) -> Vec<String> {
    record
        .iter()
        .map(|cell| String::from_utf8_lossy(cell).trim().to_string())
        .collect()
}

fn embedded_newlines(record: &csv::ByteRecord) -> u64 {
    record
        .iter()
        .map(|cell| cell.iter().filter(|b| **b == b'\n').count() as u64)
        .sum()
}

fn convert_csv_error(e: csv::Error) -> FeedError {
    let message = e.to_string();
    match e.into_kind() {
        csv::ErrorKind::Io(io) => FeedError::Io(io),
        _ => FeedError::Parse(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn feed_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn drain(reader: &mut FeedReader) -> Vec<RawRow> {
        let mut rows = Vec::new();
        while let Some(row) = reader.next_row().unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn test_header_is_read_once_and_trimmed() {
        let file = feed_file("Pack Reference , Variable\nPK1,pH Lab\n");
        let mut reader = FeedReader::open(file.path(), HeaderMode::Detect).unwrap();

        assert_eq!(
            reader.header().unwrap(),
            &["Pack Reference".to_string(), "Variable".to_string()]
        );

        let rows = drain(&mut reader);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells, vec!["PK1", "pH Lab"]);
        assert_eq!(rows[0].line, 2);
    }

    #[test]
    fn test_cells_are_trimmed() {
        let file = feed_file("a,b\n  PK1  ,  7.2  \n");
        let mut reader = FeedReader::open(file.path(), HeaderMode::Detect).unwrap();
        let rows = drain(&mut reader);
        assert_eq!(rows[0].cells, vec!["PK1", "7.2"]);
    }

    #[test]
    fn test_empty_lines_are_counted_not_forwarded() {
        let file = feed_file("a,b\nPK1,1\n\n , \nPK2,2\n\n");
        let mut reader = FeedReader::open(file.path(), HeaderMode::Detect).unwrap();

        let rows = drain(&mut reader);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells[0], "PK1");
        assert_eq!(rows[1].cells[0], "PK2");
        assert_eq!(reader.empty_lines(), 3);
    }

    #[test]
    fn test_wrong_cell_count_is_flagged() {
        let file = feed_file("a,b,c\nPK1,x\nPK2,y,z\n");
        let mut reader = FeedReader::open(file.path(), HeaderMode::Detect).unwrap();

        let rows = drain(&mut reader);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_flagged());
        assert_eq!(
            rows[0].parse_error.as_deref(),
            Some("Expected 3 cells, found 2")
        );
        assert_eq!(rows[0].cells, vec!["PK1", "x"]);
        assert!(!rows[1].is_flagged());
    }

    #[test]
    fn test_fixed_mode_treats_first_line_as_data() {
        let file = feed_file("PK1,SITE-9,pH Lab,7.2,,01/02/2024,,02/02/2024\n");
        let mut reader = FeedReader::open(file.path(), HeaderMode::Fixed).unwrap();

        assert!(reader.header().is_none());
        let rows = drain(&mut reader);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells[0], "PK1");
        assert_eq!(rows[0].line, 1);
    }

    #[test]
    fn test_fixed_mode_flags_short_rows() {
        let file = feed_file("PK1,only,three\n");
        let mut reader = FeedReader::open(file.path(), HeaderMode::Fixed).unwrap();
        let rows = drain(&mut reader);
        assert!(rows[0].is_flagged());
    }

    #[test]
    fn test_resume_from_saved_offset() {
        let file = feed_file("a,b\nPK1,1\nPK2,2\nPK3,3\n");
        let mut reader = FeedReader::open(file.path(), HeaderMode::Detect).unwrap();

        let first = reader.next_row().unwrap().unwrap();
        assert_eq!(first.cells[0], "PK1");
        let offset = reader.position();
        let line = reader.line_cursor();

        let mut resumed = FeedReader::resume(file.path(), offset, line, Some(2)).unwrap();
        let rows = drain(&mut resumed);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells[0], "PK2");
        assert_eq!(rows[0].line, 3);
        assert_eq!(rows[1].cells[0], "PK3");
    }

    #[test]
    fn test_resume_at_end_yields_nothing() {
        let file = feed_file("a,b\nPK1,1\n");
        let mut reader = FeedReader::open(file.path(), HeaderMode::Detect).unwrap();
        drain(&mut reader);

        let mut resumed =
            FeedReader::resume(file.path(), reader.position(), reader.line_cursor(), Some(2))
                .unwrap();
        assert!(resumed.next_row().unwrap().is_none());
    }

    #[test]
    fn test_empty_file_has_no_header_and_no_rows() {
        let file = feed_file("");
        let mut reader = FeedReader::open(file.path(), HeaderMode::Detect).unwrap();
        assert!(reader.header().is_none());
        assert!(reader.next_row().unwrap().is_none());
    }

    #[test]
    fn test_quoted_cells_keep_commas() {
        let file = feed_file("a,b\n\"PK1, extra\",2\n");
        let mut reader = FeedReader::open(file.path(), HeaderMode::Detect).unwrap();
        let rows = drain(&mut reader);
        assert_eq!(rows[0].cells[0], "PK1, extra");
    }
}
