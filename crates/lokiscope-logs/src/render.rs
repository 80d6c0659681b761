use serde::Serialize;
use std::io::Write;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::{DecodeError, RenderError};
use lokiscope_types::{CompactedEntry, LogRecord, OutputMode};

/// Table columns and their display widths
const COLUMNS: [(&str, usize); 5] = [
    ("Timestamp", 20),
    ("Accelerator", 15),
    ("Origin", 15),
    ("Facility", 20),
    ("Text", 40),
];

/// Per-record object written in the JSON modes
#[derive(Serialize)]
struct JsonRecord<'a> {
    accelerator: &'a str,
    origin: &'a str,
    user: &'a str,
    facility: &'a str,
    severity: &'a str,
    text: &'a str,
    timestamp: &'a str,
}

impl<'a> From<&'a LogRecord> for JsonRecord<'a> {
    fn from(record: &'a LogRecord) -> Self {
        Self {
            accelerator: &record.accelerator,
            origin: &record.origin,
            user: &record.user,
            facility: &record.facility,
            severity: &record.severity,
            text: &record.text,
            timestamp: bare_timestamp(&record.timestamp_text),
        }
    }
}

/// Writes entries to an output in one of the supported modes
pub struct OutputRenderer<W> {
    out: W,
    mode: OutputMode,
    table_header: bool,
    started: bool,
}

impl<W: Write> OutputRenderer<W> {
    pub fn new(out: W, mode: OutputMode, table_header: bool) -> Self {
        Self {
            out,
            mode,
            table_header,
            started: false,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Write anything that precedes the first entry
    ///
    /// Only the table mode has a preamble, and only when a header was asked
    /// for. Calling this more than once has no further effect.
    pub fn begin(&mut self) -> Result<(), RenderError> {
        if std::mem::replace(&mut self.started, true) {
            return Ok(());
        }
        if self.mode == OutputMode::Table && self.table_header {
            let header: Vec<String> = COLUMNS.iter().map(|(name, width)| fit(name, *width)).collect();
            writeln!(self.out, "{}", header.join(" "))?;
            writeln!(self.out, "{}", "-".repeat(table_width()))?;
        }
        Ok(())
    }

    /// Pass a store line through unchanged
    pub fn raw_line(&mut self, line: &str) -> Result<(), RenderError> {
        self.begin()?;
        writeln!(self.out, "{line}")?;
        Ok(())
    }

    /// Render one entry
    pub fn entry(&mut self, entry: &CompactedEntry) -> Result<(), RenderError> {
        self.begin()?;
        let record = entry.record();

        match self.mode {
            OutputMode::Table => match entry {
                CompactedEntry::Single(_) => writeln!(self.out, "{}", table_row(record))?,
                CompactedEntry::Repeated { count, .. } => {
                    writeln!(self.out)?;
                    writeln!(self.out, "{}", table_row(record))?;
                    writeln!(self.out, "{count} Like:")?;
                    writeln!(self.out)?;
                }
            },
            // Raw output is the store's own lines, see `raw_line`
            OutputMode::Raw => return Err(RenderError::RawRecord),
            // The JSON modes carry no run annotation, so a folded run is
            // written out once per record it stands for
            OutputMode::Json => {
                for _ in 0..entry.count() {
                    serde_json::to_writer_pretty(&mut self.out, &JsonRecord::from(record))?;
                    writeln!(self.out)?;
                }
            }
            OutputMode::Jsonl => {
                for _ in 0..entry.count() {
                    serde_json::to_writer(&mut self.out, &JsonRecord::from(record))?;
                    writeln!(self.out)?;
                }
            }
        }
        Ok(())
    }

    /// Render a whole sequence, stopping at the first upstream error
    ///
    /// Entries rendered before the error stay written.
    pub fn render_all<I>(&mut self, entries: I) -> Result<usize, RenderError>
    where
        I: IntoIterator<Item = Result<CompactedEntry, DecodeError>>,
    {
        self.begin()?;
        let mut rendered = 0;
        for entry in entries {
            self.entry(&entry.map_err(RenderError::Upstream)?)?;
            rendered += 1;
        }
        self.flush()?;
        Ok(rendered)
    }

    pub fn flush(&mut self) -> Result<(), RenderError> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Drop a trailing `Z` or `±HH:MM` offset from a timestamp
///
/// Everything else is left as the store printed it, so
/// `2023-09-20T10:00:00.123456+00:00` becomes `2023-09-20T10:00:00.123456`.
pub fn bare_timestamp(ts: &str) -> &str {
    if let Some(bare) = ts.strip_suffix(['Z', 'z']) {
        return bare;
    }
    let bytes = ts.as_bytes();
    let n = bytes.len();
    let is_offset = n >= 6
        && matches!(bytes[n - 6], b'+' | b'-')
        && bytes[n - 3] == b':'
        && [n - 5, n - 4, n - 2, n - 1]
            .iter()
            .all(|&i| bytes[i].is_ascii_digit());
    if is_offset { &ts[..n - 6] } else { ts }
}

fn table_row(record: &LogRecord) -> String {
    let timestamp = record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
    let cells: [&str; 4] = [
        timestamp.as_str(),
        &record.accelerator,
        &record.origin,
        &record.facility,
    ];

    let mut row = String::with_capacity(table_width());
    for (value, (_, width)) in cells.iter().zip(COLUMNS) {
        row.push_str(&fit(value, width));
        row.push(' ');
    }

    // Text is never cut, only padded
    let text = single_line(&record.text);
    row.push_str(&text);
    let text_width = COLUMNS[4].1;
    for _ in text.width()..text_width {
        row.push(' ');
    }
    row
}

/// Total width of a table line, including column separators
fn table_width() -> usize {
    COLUMNS.iter().map(|(_, w)| w).sum::<usize>() + COLUMNS.len() - 1
}

/// Truncate or pad a cell to exactly `width` display columns
fn fit(value: &str, width: usize) -> String {
    let mut cell = String::with_capacity(width);
    let mut used = 0;
    for c in single_line(value).chars() {
        let w = c.width().unwrap_or(0);
        if used + w > width {
            break;
        }
        cell.push(c);
        used += w;
    }
    for _ in used..width {
        cell.push(' ');
    }
    cell
}

fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}
