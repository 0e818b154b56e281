//! Durable snapshot files.
//!
//! # Format
//!
//! ```text
//! [BOM]Title,Text,Category,URL
//! How to ...,Open the ...,https://.../categories/1,https://.../articles/9
//! ```
//!
//! One header line naming the columns, then one line per record with values
//! joined by the delimiter. Values are never quoted or escaped: the
//! [`Sanitizer`](crate::sanitize::Sanitizer) guarantees none of them contains
//! the delimiter or a line break, and [`render`] refuses any that does.
//!
//! Writes go through `atomic-write-file`, so the target path always holds
//! either the previous complete file or the new complete file.

use atomic_write_file::AtomicWriteFile;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use crate::error::{HarvestError, ParseError};
use crate::models::{Delimiter, Record, Schema, Sentinel, Snapshot, SENTINEL_KEY};

const BOM: char = '\u{FEFF}';
const BOM_BYTES: &[u8] = b"\xEF\xBB\xBF";

/// On-disk settings shared by every file a run writes.
#[derive(Debug, Clone)]
pub struct FileFormat {
    pub schema: Schema,
    pub delimiter: Delimiter,
    pub write_bom: bool,
}

/// Outcome of [`load`]: the snapshot plus the rows that had to be dropped.
#[derive(Debug, Default)]
pub struct Loaded {
    pub snapshot: Snapshot,
    pub skipped: Vec<ParseError>,
}

/// Load a snapshot. A missing file is a first run and yields an empty snapshot.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn load(path: &Path, format: &FileFormat) -> Result<Loaded, HarvestError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("No previous snapshot; starting from empty");
            return Ok(Loaded::default());
        }
        Err(e) => return Err(HarvestError::io(path, e)),
    };

    let loaded = parse(&bytes, format).map_err(|reason| HarvestError::Format {
        path: path.to_path_buf(),
        reason,
    })?;

    for err in &loaded.skipped {
        warn!(line = err.line, reason = %err.reason, "Skipping malformed snapshot row");
    }
    info!(
        records = loaded.snapshot.len(),
        skipped = loaded.skipped.len(),
        "Loaded previous snapshot"
    );
    Ok(loaded)
}

/// Parse file contents. Each line is decoded on its own, so a row that is
/// not UTF-8 is skipped like any other malformed row. Only an unusable
/// header is an error.
pub fn parse(bytes: &[u8], format: &FileFormat) -> Result<Loaded, String> {
    let sep = format.delimiter.as_char();
    let bytes = bytes.strip_prefix(BOM_BYTES).unwrap_or(bytes);
    if bytes.is_empty() {
        warn!("Snapshot file is empty; treating as no history");
        return Ok(Loaded::default());
    }
    let mut lines = bytes
        .split(|b| *b == b'\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line.strip_suffix(b"\r").unwrap_or(line)));

    let header = match lines.next() {
        Some((_, header)) => std::str::from_utf8(header)
            .map_err(|e| format!("header is not valid UTF-8: {e}"))?,
        None => return Ok(Loaded::default()),
    };
    let header: Vec<&str> = header.split(sep).collect();
    let position: HashMap<&str, usize> = header.iter().enumerate().map(|(i, c)| (*c, i)).collect();
    let key_at = *position
        .get(format.schema.key_column())
        .ok_or_else(|| format!("header has no {:?} column", format.schema.key_column()))?;

    let mut loaded = Loaded::default();
    for (line, row) in lines {
        if row.is_empty() {
            continue;
        }
        let parsed = std::str::from_utf8(row)
            .map_err(|e| format!("not valid UTF-8: {e}"))
            .and_then(|row| parse_row(row, sep, &header, &position, key_at, &format.schema));
        match parsed {
            Ok(record) if loaded.snapshot.contains_key(&record.key) => {
                loaded.skipped.push(ParseError {
                    line,
                    reason: format!("duplicate key {:?}", record.key),
                });
            }
            Ok(record) => {
                loaded.snapshot.insert(record);
            }
            Err(reason) => loaded.skipped.push(ParseError { line, reason }),
        }
    }
    Ok(loaded)
}

fn parse_row(
    row: &str,
    sep: char,
    header: &[&str],
    position: &HashMap<&str, usize>,
    key_at: usize,
    schema: &Schema,
) -> Result<Record, String> {
    let values: Vec<&str> = row.split(sep).collect();
    if values.len() != header.len() {
        return Err(format!(
            "expected {} fields, found {}",
            header.len(),
            values.len()
        ));
    }
    let key = values[key_at];
    if key.is_empty() {
        return Err("empty key".to_string());
    }
    if key == SENTINEL_KEY {
        return Err("no-update marker row in data file".to_string());
    }

    let mut record = Record::new(key);
    for column in schema.value_columns() {
        let value = position.get(column).map(|&i| values[i]).unwrap_or("");
        record.set(column, value);
    }
    Ok(record)
}

/// Render a full file: header, then every record in snapshot order.
pub fn render(snapshot: &Snapshot, format: &FileFormat) -> Result<String, HarvestError> {
    let mut out = header(format);
    for record in snapshot.iter() {
        push_row(&mut out, &format.schema.row(record), record, format)?;
    }
    Ok(out)
}

/// Render the latest-run file for a run that changed nothing: header plus a
/// single marker row carrying the generation time.
pub fn render_sentinel(sentinel: &Sentinel, format: &FileFormat) -> String {
    let mut out = header(format);
    let sep = format.delimiter.as_char().to_string();
    let timestamp = sentinel.timestamp();
    let mut stamped = false;
    let row: Vec<&str> = format
        .schema
        .columns()
        .iter()
        .map(|c| {
            if c == format.schema.key_column() {
                SENTINEL_KEY
            } else if !stamped {
                stamped = true;
                timestamp.as_str()
            } else {
                ""
            }
        })
        .collect();
    out.push_str(&row.join(&sep));
    out.push('\n');
    out
}

fn header(format: &FileFormat) -> String {
    let mut out = String::new();
    if format.write_bom {
        out.push(BOM);
    }
    out.push_str(&format.schema.columns().join(&format.delimiter.as_char().to_string()));
    out.push('\n');
    out
}

fn push_row(
    out: &mut String,
    values: &[&str],
    record: &Record,
    format: &FileFormat,
) -> Result<(), HarvestError> {
    let sep = format.delimiter.as_char();
    for (i, (column, value)) in format.schema.columns().iter().zip(values).enumerate() {
        if value.contains([sep, '\n', '\r']) {
            return Err(HarvestError::Unsanitized {
                key: record.key.clone(),
                column: column.clone(),
            });
        }
        if i > 0 {
            out.push(sep);
        }
        out.push_str(value);
    }
    out.push('\n');
    Ok(())
}

/// Atomically save a snapshot to `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display(), records = snapshot.len()))]
pub fn save(snapshot: &Snapshot, path: &Path, format: &FileFormat) -> Result<(), HarvestError> {
    let contents = render(snapshot, format)?;
    write_atomic(path, contents.as_bytes())?;
    info!("Saved snapshot");
    Ok(())
}

/// Write `contents` to a temporary sibling of `path`, fsync it, then rename
/// it over `path`. On any error the temporary file is discarded.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), HarvestError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
    }

    let mut file = AtomicWriteFile::options()
        .open(path)
        .map_err(|e| HarvestError::io(path, e))?;
    if let Err(e) = fill(&mut file, contents) {
        // the original error is the one worth reporting
        let _ = file.discard();
        return Err(HarvestError::io(path, e));
    }
    file.commit().map_err(|e| HarvestError::io(path, e))?;
    debug!(path = %path.display(), bytes = contents.len(), "Committed file");
    Ok(())
}

fn fill(file: &mut AtomicWriteFile, contents: &[u8]) -> io::Result<()> {
    file.write_all(contents)?;
    file.flush()?;
    file.as_file().sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::Sanitizer;
    use tempfile::tempdir;

    fn format(delimiter: Delimiter) -> FileFormat {
        FileFormat {
            schema: Schema::default(),
            delimiter,
            write_bom: true,
        }
    }

    fn article(url: &str, title: &str) -> Record {
        Record::new(url)
            .with_field("Title", title)
            .with_field("Text", format!("Body of {title}"))
            .with_field("Category", "https://help.example.com/categories/1")
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let loaded = load(&dir.path().join("nope.csv"), &format(Delimiter::Comma)).unwrap();
        assert!(loaded.snapshot.is_empty());
        assert!(loaded.skipped.is_empty());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("articles.csv");
        let fmt = format(Delimiter::Comma);
        let snapshot: Snapshot = [
            article("https://help.example.com/articles/2", "Second"),
            article("https://help.example.com/articles/1", "First"),
        ]
        .into_iter()
        .collect();

        save(&snapshot, &path, &fmt).unwrap();
        let loaded = load(&path, &fmt).unwrap();
        assert_eq!(loaded.snapshot, snapshot);
        assert!(loaded.skipped.is_empty());
    }

    #[test]
    fn test_sanitized_delimiter_value_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("articles.psv");
        let fmt = format(Delimiter::Pipe);
        let raw = Record::new("https://help.example.com/articles/1")
            .with_field("Title", "line1\ntab\tvalue|with|delimiter")
            .with_field("Text", "")
            .with_field("Category", "c");
        let record = Sanitizer::new(Delimiter::Pipe).sanitize(raw);
        let snapshot: Snapshot = [record.clone()].into_iter().collect();

        save(&snapshot, &path, &fmt).unwrap();
        let loaded = load(&path, &fmt).unwrap();
        let back = loaded.snapshot.get(&record.key).unwrap();
        assert_eq!(back, &record);
        assert!(!back.get("Title").unwrap().contains('|'));
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let text = "Title,Text,Category,URL\n\
                    A,a,c,https://x/1\n\
                    too,few,fields\n\
                    B,b,c,\n\
                    C,c,c,https://x/1\n\
                    1,1,1,__no_update__\n\
                    D,d,c,https://x/2\n";
        let loaded = parse(text.as_bytes(), &format(Delimiter::Comma)).unwrap();
        assert_eq!(loaded.snapshot.len(), 2);
        assert_eq!(loaded.snapshot.get("https://x/1").unwrap().get("Title"), Some("A"));
        let lines: Vec<usize> = loaded.skipped.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_non_utf8_row_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("articles.csv");
        fs::write(&path, b"Title,Text,Category,URL\nA,a,c,https://x/1\nB,\xff\xfe,c,https://x/2\n").unwrap();

        let loaded = load(&path, &format(Delimiter::Comma)).unwrap();
        assert_eq!(loaded.snapshot.len(), 1);
        assert!(loaded.snapshot.contains_key("https://x/1"));
        assert_eq!(loaded.skipped.len(), 1);
        assert_eq!(loaded.skipped[0].line, 3);
    }

    #[test]
    fn test_non_utf8_header_is_fatal() {
        let err = parse(b"Title,\xffText,URL\nA,a,https://x/1\n", &format(Delimiter::Comma)).unwrap_err();
        assert!(err.contains("UTF-8"));
    }

    #[test]
    fn test_header_without_key_column_is_fatal() {
        let err = parse(b"Title,Text\nA,a\n", &format(Delimiter::Comma)).unwrap_err();
        assert!(err.contains("URL"));
    }

    #[test]
    fn test_reordered_header_maps_by_name() {
        let text = "\u{FEFF}URL,Title\r\nhttps://x/1,A\r\n";
        let loaded = parse(text.as_bytes(), &format(Delimiter::Comma)).unwrap();
        let rec = loaded.snapshot.get("https://x/1").unwrap();
        assert_eq!(rec.get("Title"), Some("A"));
        assert_eq!(rec.get("Text"), Some(""));
    }

    #[test]
    fn test_render_rejects_unsanitized_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("articles.csv");
        let fmt = format(Delimiter::Comma);
        let good: Snapshot = [article("https://x/1", "Fine")].into_iter().collect();
        save(&good, &path, &fmt).unwrap();
        let before = fs::read(&path).unwrap();

        let bad: Snapshot = [article("https://x/1", "a,b")].into_iter().collect();
        let err = save(&bad, &path, &fmt).unwrap_err();
        assert_eq!(err.kind(), "unsanitized_value");
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_sentinel_file_is_header_plus_one_marker_row() {
        let fmt = format(Delimiter::Comma);
        let sentinel = Sentinel::now();
        let text = render_sentinel(&sentinel, &fmt);
        let lines: Vec<&str> = text.trim_start_matches(BOM).lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Title,Text,Category,URL");
        assert_eq!(lines[1], format!("{},,,{}", sentinel.timestamp(), SENTINEL_KEY));
    }

    #[test]
    fn test_empty_snapshot_renders_header_only() {
        let mut fmt = format(Delimiter::Tab);
        fmt.write_bom = false;
        assert_eq!(render(&Snapshot::new(), &fmt).unwrap(), "Title\tText\tCategory\tURL\n");
    }
}
