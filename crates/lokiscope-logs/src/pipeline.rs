use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::io::Write;
use tokio_util::sync::CancellationToken;

use crate::{LineDecoder, OutputRenderer, PipelineError, RenderError, RepetitionCompactor};
use lokiscope_query::{LogStore, QueryExpressionBuilder, StoreQuery, resolve_range};
use lokiscope_types::{
    CompactedEntry, FieldConstraints, NoiseFilters, OutputMode, Retrieval, StoreEncoding,
    TextMatchTerm, TimeRange,
};

/// Everything one invocation asks for
#[derive(Clone, Debug)]
pub struct PipelineRequest {
    pub constraints: FieldConstraints,
    pub terms: Vec<TextMatchTerm>,
    pub noise: NoiseFilters,

    /// Unresolved time tokens
    pub range: TimeRange,

    pub retrieval: Retrieval,
    pub output: OutputMode,
    pub table_header: bool,

    /// Fold adjacent repeats (table output only)
    pub compact: bool,

    /// Ask the store to print stream labels
    pub with_labels: bool,

    /// Extra arguments handed to the store
    pub passthrough: Vec<String>,
}

impl Default for PipelineRequest {
    fn default() -> Self {
        Self {
            constraints: FieldConstraints::new(),
            terms: Vec::new(),
            noise: NoiseFilters::default(),
            range: TimeRange::default(),
            retrieval: Retrieval::OneShot {
                limit: 100,
                direction: Default::default(),
            },
            output: OutputMode::Table,
            table_header: false,
            compact: true,
            with_labels: false,
            passthrough: Vec::new(),
        }
    }
}

/// Counters for a finished run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Lines received from the store
    pub lines: u64,
    /// Lines decoded into records
    pub records: u64,
    /// Entries written
    pub entries: u64,
    pub decode_failures: u64,
    /// Whether the run was stopped by the cancellation token
    pub cancelled: bool,
}

/// Query, decode, compact and render one stream of log lines
pub struct Pipeline {
    builder: QueryExpressionBuilder,
}

impl Pipeline {
    pub fn new(builder: QueryExpressionBuilder) -> Self {
        Self { builder }
    }

    /// Build the store query for a request, resolving times against `now`
    pub fn prepare(&self, request: &PipelineRequest, now: DateTime<Utc>) -> StoreQuery {
        let expression =
            self.builder
                .build(request.constraints.clone(), &request.terms, request.noise);

        StoreQuery {
            expression,
            range: resolve_range(&request.range, now),
            encoding: StoreEncoding::from(request.output),
            with_labels: request.with_labels,
            passthrough: request.passthrough.clone(),
        }
    }

    /// Run the request against `store`, writing rendered output to `out`
    ///
    /// Lines are handled one at a time as the store delivers them. When the
    /// stream ends, fails, or `cancel` fires, any pending run is flushed
    /// before returning. Output already written is never taken back.
    pub async fn run<S, W>(
        &self,
        store: &S,
        request: &PipelineRequest,
        out: W,
        cancel: CancellationToken,
    ) -> Result<PipelineStats, PipelineError>
    where
        S: LogStore + ?Sized,
        W: Write,
    {
        let query = self.prepare(request, Utc::now());
        tracing::debug!(
            expression = %query.expression,
            from = ?query.range.from,
            to = ?query.range.to,
            retrieval = ?request.retrieval,
            "prepared query"
        );

        let mut lines = match request.retrieval {
            Retrieval::OneShot { limit, direction } => store.query(&query, limit, direction)?,
            Retrieval::Tail => store.tail(&query)?,
        };

        let mut compactor =
            RepetitionCompactor::new(request.compact && request.output == OutputMode::Table);
        let mut renderer = OutputRenderer::new(out, request.output, request.table_header);
        let mut stats = PipelineStats::default();

        renderer.begin()?;
        renderer.flush()?;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = lines.next() => Some(next),
            };

            let line = match next {
                None => {
                    stats.cancelled = true;
                    break Ok(());
                }
                Some(None) => break Ok(()),
                Some(Some(Err(e))) => break Err(PipelineError::Query(e)),
                Some(Some(Ok(line))) => line,
            };
            stats.lines += 1;

            if request.output == OutputMode::Raw {
                renderer.raw_line(&line)?;
                renderer.flush()?;
                stats.entries += 1;
                continue;
            }

            let decoded = match request.output {
                OutputMode::Table => LineDecoder::decode(&line, request.with_labels),
                _ => LineDecoder::decode_envelope(&line),
            };
            match decoded {
                Ok(record) => {
                    stats.records += 1;
                    if let Some(entry) = compactor.push(record) {
                        emit(&mut renderer, &mut stats, &entry)?;
                    }
                }
                Err(e) => {
                    stats.decode_failures += 1;
                    tracing::warn!(error = %e, line = %line, "skipping undecodable line");
                }
            }
        };

        // Stop the store before draining what is left
        drop(lines);

        if let Some(entry) = compactor.finish() {
            emit(&mut renderer, &mut stats, &entry)?;
        }
        renderer.flush()?;

        match &outcome {
            Ok(()) => tracing::debug!(?stats, "pipeline finished"),
            Err(e) => tracing::debug!(?stats, error = %e, "pipeline stopped"),
        }
        outcome.map(|()| stats)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(QueryExpressionBuilder::default())
    }
}

fn emit<W: Write>(
    renderer: &mut OutputRenderer<W>,
    stats: &mut PipelineStats,
    entry: &CompactedEntry,
) -> Result<(), RenderError> {
    renderer.entry(entry)?;
    renderer.flush()?;
    stats.entries += 1;
    Ok(())
}
