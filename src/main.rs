use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use lokiscope_logs::{OutputMode, Pipeline, PipelineError, PipelineRequest, RenderError};
use lokiscope_query::{
    Direction, FieldConstraints, FieldKey, NoiseFilters, QueryExpressionBuilder, TextMatchTerm,
    TimeRange,
};
use lokiscope_types::Retrieval;

mod config;

use config::Config;

/// Lokiscope - query accelerator logs from Loki and format them
#[derive(Parser, Debug)]
#[command(name = "lokiscope")]
#[command(author, version, about, long_about = None)]
#[command(args_override_self = true)]
struct Args {
    /// Only entries from this accelerator
    #[arg(short = 'a', long)]
    accelerator: Option<String>,

    /// Only entries from this origin
    #[arg(short = 'o', long)]
    origin: Option<String>,

    /// Only entries logged by this user
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// Only entries from this facility
    #[arg(short = 'f', long)]
    facility: Option<String>,

    /// Only entries with this severity
    #[arg(short = 's', long)]
    severity: Option<String>,

    /// Keep only lines matching this regex (repeatable)
    #[arg(short = 'g', long = "grep", value_name = "REGEX")]
    grep: Vec<String>,

    /// Drop lines matching this regex (repeatable)
    #[arg(short = 'v', long = "exclude", value_name = "REGEX")]
    exclude: Vec<String>,

    /// Start of the range: absolute timestamp, or relative like -2d / -36h
    #[arg(long, value_name = "TIME", allow_hyphen_values = true)]
    since: Option<String>,

    /// End of the range: absolute timestamp, or relative like -2d / -36h
    #[arg(long, value_name = "TIME", allow_hyphen_values = true)]
    until: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Output::Default)]
    output: Output,

    /// Print a column header above table output
    #[arg(long)]
    table: bool,

    /// Show every line instead of folding adjacent repeats
    #[arg(long)]
    no_compact: bool,

    /// Follow new entries as they arrive
    #[arg(long, conflicts_with = "forward")]
    tail: bool,

    /// Oldest entries first (default is newest first)
    #[arg(long)]
    forward: bool,

    /// Maximum number of entries for one-shot queries
    #[arg(long)]
    limit: Option<u32>,

    /// Include change-log entries
    #[arg(long)]
    include_changelog: bool,

    /// Include watcher entries
    #[arg(long)]
    include_watcher: bool,

    /// Include put-log entries
    #[arg(long)]
    include_putlog: bool,

    /// Keep stream labels in the store output
    #[arg(long)]
    labels: bool,

    /// Config file (default: ~/.config/lokiscope/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the query and the logcli invocation instead of running it
    #[arg(long)]
    print_query: bool,

    /// Extra arguments passed to logcli unchanged
    #[arg(last = true, value_name = "LOGCLI ARGS")]
    passthrough: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Output {
    Default,
    Raw,
    Json,
    Jsonl,
}

impl From<Output> for OutputMode {
    fn from(output: Output) -> Self {
        match output {
            Output::Default => OutputMode::Table,
            Output::Raw => OutputMode::Raw,
            Output::Json => OutputMode::Json,
            Output::Jsonl => OutputMode::Jsonl,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches)?;
    let terms = text_terms(&matches);

    // Logs go to stderr so they never mix with rendered output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args, terms).await;
    Ok(exit_code(&result))
}

/// Report a failed run on stderr and pick the process exit status
fn exit_code(result: &Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, terms: Vec<TextMatchTerm>) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;

    let builder = QueryExpressionBuilder::new(&config.query.selector)
        .with_noise_patterns(config.noise.patterns());
    let pipeline = Pipeline::new(builder);
    let request = build_request(&args, terms, &config);
    let store = config.store.client();

    if args.print_query {
        let query = pipeline.prepare(&request, Utc::now());
        let argv = match request.retrieval {
            Retrieval::OneShot { limit, direction } => store.query_args(&query, limit, direction),
            Retrieval::Tail => store.tail_args(&query),
        };
        println!("{}", query.expression);
        println!(
            "{} {}",
            store.command(),
            argv.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ")
        );
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let stdout = std::io::stdout().lock();
    let stats = match pipeline.run(&store, &request, stdout, cancel).await {
        Ok(stats) => stats,
        // The reader went away (e.g. piped into `head`); nothing left to do
        Err(PipelineError::Render(RenderError::Io(e))) if e.kind() == ErrorKind::BrokenPipe => {
            return Ok(());
        }
        Err(e) => return Err(e).context("Log query failed"),
    };

    if stats.decode_failures > 0 {
        tracing::warn!(
            failures = stats.decode_failures,
            lines = stats.lines,
            "some lines could not be decoded"
        );
    }
    Ok(())
}

/// Translate parsed options into a pipeline request
fn build_request(args: &Args, terms: Vec<TextMatchTerm>, config: &Config) -> PipelineRequest {
    let mut constraints = FieldConstraints::new();
    let fields = [
        (FieldKey::Accelerator, &args.accelerator),
        (FieldKey::Origin, &args.origin),
        (FieldKey::User, &args.user),
        (FieldKey::Facility, &args.facility),
        (FieldKey::Severity, &args.severity),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            constraints.set(key, value.clone());
        }
    }

    let retrieval = if args.tail {
        Retrieval::Tail
    } else {
        Retrieval::OneShot {
            limit: args.limit.unwrap_or(config.store.limit),
            direction: if args.forward {
                Direction::Forward
            } else {
                Direction::Backward
            },
        }
    };

    PipelineRequest {
        constraints,
        terms,
        noise: NoiseFilters {
            changelog: !args.include_changelog,
            watcher: !args.include_watcher,
            putlog: !args.include_putlog,
        },
        range: TimeRange::new(
            args.since.clone().or_else(|| config.query.since.clone()),
            args.until.clone(),
        ),
        retrieval,
        output: args.output.into(),
        table_header: args.table,
        compact: !args.no_compact,
        with_labels: args.labels || config.query.labels,
        passthrough: args.passthrough.clone(),
    }
}

/// Collect include and exclude regexes in command-line order
fn text_terms(matches: &ArgMatches) -> Vec<TextMatchTerm> {
    let mut terms = Vec::new();
    for id in ["grep", "exclude"] {
        let (Some(values), Some(indices)) = (matches.get_many::<String>(id), matches.indices_of(id))
        else {
            continue;
        };
        for (index, pattern) in indices.zip(values) {
            let term = if id == "grep" {
                TextMatchTerm::include(pattern.clone())
            } else {
                TextMatchTerm::exclude(pattern.clone())
            };
            terms.push((index, term));
        }
    }
    terms.sort_by_key(|(index, _)| *index);
    terms.into_iter().map(|(_, term)| term).collect()
}

/// Quote an argument for display as a shell command
fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=./:,@+".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
