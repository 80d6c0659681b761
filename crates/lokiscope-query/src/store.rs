use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::QueryExecutionError;
use crate::expr::QueryExpression;
use lokiscope_types::{Direction, StoreEncoding, TimeRange};

/// Lines produced by a running query, ending with the store's verdict
pub type LineStream = BoxStream<'static, Result<String, QueryExecutionError>>;

/// Everything the store needs to run a query, except the retrieval mode
#[derive(Clone, Debug)]
pub struct StoreQuery {
    pub expression: QueryExpression,

    /// Already resolved bounds
    pub range: TimeRange,

    pub encoding: StoreEncoding,

    /// Whether stream labels should be printed before each payload
    pub with_labels: bool,

    /// Extra arguments handed to the store untouched
    pub passthrough: Vec<String>,
}

/// A log store that can run one-shot and tailing queries
pub trait LogStore {
    /// Run a bounded query; the stream ends once the result set is exhausted
    fn query(
        &self,
        query: &StoreQuery,
        limit: u32,
        direction: Direction,
    ) -> Result<LineStream, QueryExecutionError>;

    /// Follow newly arriving lines; the stream only ends if the store stops
    fn tail(&self, query: &StoreQuery) -> Result<LineStream, QueryExecutionError>;
}

/// Runs queries through the `logcli` command-line client
#[derive(Clone, Debug)]
pub struct LogcliStore {
    command: String,
    addr: Option<String>,
}

impl LogcliStore {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            addr: None,
        }
    }

    /// Point the client at a specific Loki server
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Arguments for a bounded query
    pub fn query_args(&self, query: &StoreQuery, limit: u32, direction: Direction) -> Vec<String> {
        let mut args = self.common_args(query);
        args.push(format!("--limit={limit}"));
        if direction == Direction::Forward {
            args.push("--forward".to_string());
        }
        args.extend(query.passthrough.iter().cloned());
        args
    }

    /// Arguments for a tailing query
    pub fn tail_args(&self, query: &StoreQuery) -> Vec<String> {
        let mut args = self.common_args(query);
        args.push("--tail".to_string());
        args.extend(query.passthrough.iter().cloned());
        args
    }

    fn common_args(&self, query: &StoreQuery) -> Vec<String> {
        let mut args = vec![
            "query".to_string(),
            query.expression.as_str().to_string(),
            format!("--output={}", query.encoding.as_str()),
            "--quiet".to_string(),
        ];
        if let Some(addr) = &self.addr {
            args.push(format!("--addr={addr}"));
        }
        if let Some(from) = &query.range.from {
            args.push(format!("--from={from}"));
        }
        if let Some(to) = &query.range.to {
            args.push(format!("--to={to}"));
        }
        if !query.with_labels {
            args.push("--no-labels".to_string());
        }
        args
    }

    fn spawn(&self, args: Vec<String>) -> Result<LineStream, QueryExecutionError> {
        tracing::debug!(command = %self.command, ?args, "starting store query");

        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| QueryExecutionError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| QueryExecutionError::Malformed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| QueryExecutionError::Malformed("stderr not captured".to_string()))?;

        // Drain stderr concurrently so a chatty client cannot block on a full pipe
        let stderr = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = BufReader::new(stderr).read_to_end(&mut buf).await {
                tracing::warn!(error = %e, "failed to read store client stderr");
            }
            // Diagnostics are shown even when the client mangles the encoding
            String::from_utf8_lossy(&buf).into_owned()
        });

        let running = RunningQuery {
            lines: BufReader::new(stdout).lines(),
            child,
            stderr,
        };

        Ok(stream::unfold(Some(running), |state| async move {
            let mut running = state?;
            match running.lines.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some(running))),
                Ok(None) => running.finish().await.err().map(|e| (Err(e), None)),
                Err(e) => Some((Err(QueryExecutionError::Read(e)), None)),
            }
        })
        .boxed())
    }
}

impl Default for LogcliStore {
    fn default() -> Self {
        Self::new("logcli")
    }
}

impl LogStore for LogcliStore {
    fn query(
        &self,
        query: &StoreQuery,
        limit: u32,
        direction: Direction,
    ) -> Result<LineStream, QueryExecutionError> {
        self.spawn(self.query_args(query, limit, direction))
    }

    fn tail(&self, query: &StoreQuery) -> Result<LineStream, QueryExecutionError> {
        self.spawn(self.tail_args(query))
    }
}

/// A spawned client whose stdout is still being read
struct RunningQuery {
    lines: Lines<BufReader<ChildStdout>>,
    child: Child,
    stderr: JoinHandle<String>,
}

impl RunningQuery {
    /// Reap the client once stdout hit EOF and turn its exit into a verdict
    async fn finish(mut self) -> Result<(), QueryExecutionError> {
        let status = self.child.wait().await.map_err(QueryExecutionError::Read)?;
        let stderr = self.stderr.await.unwrap_or_default();

        if status.success() {
            if !stderr.trim().is_empty() {
                tracing::debug!(stderr = %stderr.trim_end(), "store query finished with output on stderr");
            }
            Ok(())
        } else {
            Err(QueryExecutionError::Failed {
                status,
                stderr: stderr.trim_end().to_string(),
            })
        }
    }
}
