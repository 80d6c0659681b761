use lokiscope_types::{CompactedEntry, LogRecord};

/// Folds runs of adjacent repeated records into counted entries
///
/// Two records repeat each other when their text, origin and facility
/// match. Only one pending record is held at a time, so output order always
/// follows input order.
#[derive(Debug)]
pub struct RepetitionCompactor {
    enabled: bool,
    pending: Option<LogRecord>,
    run_length: usize,
}

impl RepetitionCompactor {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            pending: None,
            run_length: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Feed the next record, returning an entry once a run has ended
    pub fn push(&mut self, record: LogRecord) -> Option<CompactedEntry> {
        if !self.enabled {
            return Some(CompactedEntry::Single(record));
        }

        if self.pending.as_ref().is_some_and(|p| p.repeats(&record)) {
            self.run_length += 1;
            return None;
        }

        let flushed = self.finish();
        self.pending = Some(record);
        self.run_length = 1;
        flushed
    }

    /// Flush the pending run, if any
    pub fn finish(&mut self) -> Option<CompactedEntry> {
        let record = self.pending.take()?;
        let count = std::mem::take(&mut self.run_length);
        Some(CompactedEntry::from_run(record, count))
    }
}

/// Lazy iterator over compacted entries
pub struct Compacted<I> {
    records: I,
    compactor: RepetitionCompactor,
    done: bool,
}

impl<I> Iterator for Compacted<I>
where
    I: Iterator<Item = LogRecord>,
{
    type Item = CompactedEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        for record in self.records.by_ref() {
            if let Some(entry) = self.compactor.push(record) {
                return Some(entry);
            }
        }
        self.done = true;
        self.compactor.finish()
    }
}

/// Compact a sequence of records
///
/// With `enabled` false every record comes through as its own entry.
pub fn compact<I>(records: I, enabled: bool) -> Compacted<I::IntoIter>
where
    I: IntoIterator<Item = LogRecord>,
{
    Compacted {
        records: records.into_iter(),
        compactor: RepetitionCompactor::new(enabled),
        done: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn record(secs: u32, text: &str) -> LogRecord {
        let ts = DateTime::parse_from_rfc3339(&format!("2023-09-20T10:00:{secs:02}Z")).unwrap();
        let mut record = LogRecord::new(ts);
        record.text = text.to_string();
        record.origin = "bpm".to_string();
        record.facility = "diag".to_string();
        record
    }

    #[test]
    fn test_run_then_single() {
        let r1 = record(0, "orbit drift");
        let r2 = record(3, "beam lost");
        let input = vec![r1.clone(), record(1, "orbit drift"), record(2, "orbit drift"), r2.clone()];

        let out: Vec<_> = compact(input, true).collect();
        assert_eq!(
            out,
            vec![
                CompactedEntry::Repeated { record: r1, count: 3 },
                CompactedEntry::Single(r2),
            ]
        );
    }

    #[test]
    fn test_representative_is_first_of_run() {
        let out: Vec<_> = compact(vec![record(0, "a"), record(9, "a")], true).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].record().timestamp.timestamp() % 60, 0);
        assert_eq!(out[0].count(), 2);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(compact(Vec::<LogRecord>::new(), true).count(), 0);
        let mut compactor = RepetitionCompactor::new(true);
        assert_eq!(compactor.finish(), None);
    }

    #[test]
    fn test_disabled_passes_through() {
        let input = vec![record(0, "a"), record(1, "a"), record(2, "b")];
        let out: Vec<_> = compact(input.clone(), false).collect();
        assert_eq!(
            out,
            input.into_iter().map(CompactedEntry::Single).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_non_adjacent_repeats_stay_separate() {
        let out: Vec<_> =
            compact(vec![record(0, "a"), record(1, "b"), record(2, "a")], true).collect();
        assert_eq!(out.iter().map(CompactedEntry::count).collect::<Vec<_>>(), [1, 1, 1]);
        assert_eq!(out[2].record().text, "a");
    }

    #[test]
    fn test_empty_fields_still_compact() {
        let blank = |secs| LogRecord::new(record(secs, "").timestamp);
        let out: Vec<_> = compact(vec![blank(0), blank(1)], true).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].count(), 2);
    }

    #[test]
    fn test_origin_difference_breaks_run() {
        let mut other = record(1, "a");
        other.origin = "rf".to_string();
        let out: Vec<_> = compact(vec![record(0, "a"), other], true).collect();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_push_and_finish() {
        let mut compactor = RepetitionCompactor::new(true);
        assert_eq!(compactor.push(record(0, "a")), None);
        assert_eq!(compactor.push(record(1, "a")), None);
        let flushed = compactor.push(record(2, "b")).unwrap();
        assert_eq!(flushed.count(), 2);
        assert_eq!(compactor.finish().map(|e| e.count()), Some(1));
        assert_eq!(compactor.finish(), None);
    }
}
