//! # Patient Graph Views CLI
//!
//! Loads a property graph from a JSON document and prints patient views from
//! the reference catalog.
//!
//! ## Command Line Options
//!
//! ```text
//! -g, --graph <GRAPH>            Path to the graph JSON document
//! -p, --patient <PATIENT>        Patient identifier
//! -v, --view <VIEW>              View to run (repeatable; all views when omitted)
//!     --summary                  Print per-view record counts instead of records
//!     --golden                   Print the golden record (decoded resource documents)
//!     --golden-type <TYPE>       Print one golden collection, e.g. location
//!     --golden-types             List the golden collections holding data
//!     --include-empty            Keep empty views or collections in the output
//! -f, --format <FORMAT>          Output format (json, ndjson, csv) [default: json]
//!     --no-headers               Exclude CSV headers
//! -o, --output <OUTPUT>          Output file path (defaults to stdout)
//!     --timeout-ms <MS>          Deadline per view, retries included [default: 30000]
//!     --retries <N>              Retries after transient failures [default: 2]
//!     --strict-ids               Only accept UUID or numeric patient ids
//!     --decode-embedded          Parse JSON text attributes when loading the graph
//!     --list-views               Print the view and golden catalogs and exit
//!     --log-level <LEVEL>        error, warn, info, debug, trace [default: warn]
//! ```
//!
//! Every option can also be set through an `ATRIUS_VIEWS_*` environment
//! variable, e.g. `ATRIUS_VIEWS_GRAPH` or `ATRIUS_VIEWS_LOG_LEVEL`.
//!
//! ## Usage Examples
//!
//! ```bash
//! atrius-views-cli -g fixtures/sample_graph.json -p 008288897179 -v conditions -v allergies
//! atrius-views-cli -g fixtures/sample_graph.json -p 008288897179 -v medications -f csv -o meds.csv
//! atrius-views-cli -g fixtures/sample_graph.json -p 008288897179 --summary
//! atrius-views-cli -g fixtures/golden_graph.json -p 42 --golden-type location
//! ```

use anyhow::{Context, bail};
use atrius_graph_views::output::{format_pretty, format_results};
use atrius_graph_views::{
    ContentType, EngineConfig, IdPolicy, ViewEngine, ViewError, golden::golden_catalog,
    memory::MemoryGraphStore, reference::reference_catalog,
};
use clap::Parser;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "atrius-views-cli")]
#[command(about = "Project patient views out of a clinical property graph")]
struct Args {
    /// Path to the graph JSON document
    #[arg(long, short = 'g', env = "ATRIUS_VIEWS_GRAPH")]
    graph: Option<PathBuf>,

    /// Patient identifier, matched exactly
    #[arg(long, short = 'p', env = "ATRIUS_VIEWS_PATIENT")]
    patient: Option<String>,

    /// View to run; repeat for several, omit for all
    #[arg(long = "view", short = 'v')]
    views: Vec<String>,

    /// Print per-view record counts instead of records
    #[arg(long)]
    summary: bool,

    /// Print the golden record instead of projected views
    #[arg(long)]
    golden: bool,

    /// Print one collection of the golden record
    #[arg(long)]
    golden_type: Option<String>,

    /// List the golden collections holding data
    #[arg(long)]
    golden_types: bool,

    /// Keep views or golden collections without records
    #[arg(long)]
    include_empty: bool,

    /// Output format (json, ndjson, csv)
    #[arg(long, short = 'f', env = "ATRIUS_VIEWS_FORMAT", default_value = "json")]
    format: String,

    /// Exclude CSV headers (only for CSV format, headers are included by default)
    #[arg(long)]
    no_headers: bool,

    /// Output file path (defaults to stdout)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Deadline per view request including retries, in milliseconds
    #[arg(long, env = "ATRIUS_VIEWS_TIMEOUT_MS", default_value_t = 30_000)]
    timeout_ms: u64,

    /// Retries after a timeout or an unavailable store
    #[arg(long, env = "ATRIUS_VIEWS_RETRIES", default_value_t = 2)]
    retries: u32,

    /// Only accept UUID or all-digit patient ids
    #[arg(long, env = "ATRIUS_VIEWS_STRICT_IDS")]
    strict_ids: bool,

    /// Parse JSON text attributes into structured values when loading the graph
    #[arg(long, env = "ATRIUS_VIEWS_DECODE_EMBEDDED")]
    decode_embedded: bool,

    /// Print the view catalog and exit
    #[arg(long)]
    list_views: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "ATRIUS_VIEWS_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

fn engine_config(args: &Args) -> EngineConfig {
    EngineConfig {
        deadline: Duration::from_millis(args.timeout_ms),
        retry_attempts: args.retries,
        id_policy: if args.strict_ids {
            IdPolicy::UuidOrNumeric
        } else {
            IdPolicy::Opaque
        },
        ..EngineConfig::default()
    }
}

fn content_type(format: &str, no_headers: bool) -> Result<ContentType, ViewError> {
    match ContentType::from_string(format)? {
        ContentType::CsvWithHeader if no_headers => Ok(ContentType::Csv),
        other => Ok(other),
    }
}

/// The requested views, or every catalog view when none were named.
fn selected_views<'a>(requested: &'a [String], catalog: &'a [String]) -> Vec<&'a str> {
    let views = if requested.is_empty() { catalog } else { requested };
    views.iter().map(String::as_str).collect()
}

fn write_output(output: Option<&PathBuf>, bytes: &[u8]) -> anyhow::Result<()> {
    match output {
        Some(path) => fs::write(path, bytes)
            .with_context(|| format!("Failed to write output to {}", path.display())),
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = format!(
        "atrius_graph_views={},atrius_views_cli={}",
        args.log_level, args.log_level
    );
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .init();

    if args.list_views {
        let catalog = reference_catalog()?;
        let mut listing = format!("catalog version {}\n", catalog.version());
        for name in catalog.view_names() {
            let spec = catalog.get(name)?;
            listing.push_str(&format!("{}\t{}\n", name, spec.field_names().join(",")));
        }
        let golden = golden_catalog()?;
        listing.push_str(&format!("golden version {}\n", golden.version()));
        for name in golden.names() {
            listing.push_str(&format!("{}\n", name));
        }
        return write_output(args.output.as_ref(), listing.as_bytes());
    }

    let Some(graph) = args.graph.as_ref() else {
        bail!("A graph is required. Please provide --graph or ATRIUS_VIEWS_GRAPH.");
    };
    let Some(patient) = args.patient.as_deref() else {
        bail!("A patient id is required. Please provide --patient or ATRIUS_VIEWS_PATIENT.");
    };

    let store = MemoryGraphStore::load(graph, args.decode_embedded)
        .await
        .with_context(|| format!("Failed to load graph from {}", graph.display()))?;
    let engine = ViewEngine::with_reference_catalog(Arc::new(store), engine_config(&args))?;
    info!("Using catalog version {}", engine.catalog().version());

    let bytes = if args.summary {
        let summary = engine.summarize(patient, args.include_empty).await?;
        format_pretty(&summary)?
    } else if let Some(data_type) = args.golden_type.as_deref() {
        format_pretty(&engine.golden_collection(patient, data_type).await?)?
    } else if args.golden_types {
        format_pretty(&engine.golden_types(patient).await?)?
    } else if args.golden {
        format_pretty(&engine.golden_pdm(patient, args.include_empty).await?)?
    } else {
        let content_type = content_type(&args.format, args.no_headers)?;
        let views = selected_views(&args.views, engine.catalog().view_names());
        let results = engine.get_views(patient, &views).await?;
        format_results(&results, content_type)?
    };

    write_output(args.output.as_ref(), &bytes)
}
