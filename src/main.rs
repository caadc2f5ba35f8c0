//! Event Viewer Binary Entry Point
//!
//! Command-line front end over the event store: capture events, browse and
//! search the history, and answer "has this happened" questions.
//! Core functionality is provided by the `eventviewer` library crate.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use eventviewer::{
    config::AppConfig,
    registry::{self, Predefined},
    storage::{Event, EventId, EventRecord, EventStore, ParameterSet, StorageBuilder},
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Event Viewer - Embedded Analytics Event Store
#[derive(Parser, Debug)]
#[command(name = "eventviewer", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, env = "EVENTVIEWER_CONFIG")]
    config: Option<PathBuf>,

    /// Database path, or `:memory:` (overrides config file)
    #[arg(long, env = "EVENTVIEWER_DB")]
    db: Option<String>,

    /// Tracing filter (overrides RUST_LOG and config file)
    #[arg(long, env = "EVENTVIEWER_LOG")]
    log: Option<String>,

    /// Print records as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record an event
    Capture {
        /// Event identifier, e.g. `sign_up`
        id: String,
        /// Display name
        #[arg(long, default_value = "")]
        name: String,
        /// Parameters as a JSON object, e.g. '{"scene":"login"}'
        #[arg(long)]
        params: Option<String>,
        /// Creation time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// List records, most recent first
    List {
        /// Page size; 0 lists everything
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Case and diacritic insensitive identifier substring
        #[arg(long)]
        search: Option<String>,
    },
    /// Number of stored records
    Count,
    /// Whether a matching record exists
    Exists {
        id: String,
        /// Parameter filter as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
    /// Most recent creation time of a matching record
    Last {
        id: String,
        /// Parameter filter as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
    /// Show one record
    Show { record_id: i64 },
    /// Delete one record
    Delete { record_id: i64 },
    /// Delete every record
    Clear,
    /// Record one of the predefined events
    Emit {
        event: Predefined,
        /// Value of the event's required parameter (scene or screen)
        arg: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (CLI > ENV > config file > defaults)
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    if let Some(db) = cli.db.clone() {
        config.database.path = db;
    }
    if let Some(log) = cli.log.clone() {
        config.logging.filter = Some(log);
    }
    config.validate()?;

    // Initialize tracing
    let filter = match cli.log.as_deref() {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(config.logging.filter_or_default()))?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let builder = StorageBuilder::from_config(&config.database)?;
    tracing::debug!(
        path = %config.database.path,
        channel_capacity = config.database.channel_capacity,
        checkpoint_interval = %config.database.checkpoint_interval,
        "Configuration loaded"
    );

    let store = builder.build()?;
    let result = run(&store, cli.command, cli.json);

    tracing::debug!("Shutting down storage...");
    if let Err(e) = store.shutdown() {
        tracing::error!(error = %e, "Failed to shutdown storage");
    }
    result
}

fn run(store: &EventStore, command: Command, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Capture {
            id,
            name,
            params,
            at,
        } => {
            let parameters = parse_params(params.as_deref())?;
            let event = Event::new(EventId::new(id)?, name).with_parameters(parameters);
            capture_and_sync(store, event, at)?;
        }
        Command::List {
            limit,
            offset,
            search,
        } => {
            let records = store.list(limit, offset, search.as_deref());
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    println!("{}", format_record(record));
                }
            }
            store.capture(registry::view_screen(registry::EVENTS_LIST_SCREEN), None);
        }
        Command::Count => println!("{}", store.count()),
        Command::Exists { id, params } => {
            let id = EventId::new(id)?;
            let filter = parse_filter(params.as_deref())?;
            println!("{}", store.exists(&id, filter.as_ref()));
        }
        Command::Last { id, params } => {
            let id = EventId::new(id)?;
            let filter = parse_filter(params.as_deref())?;
            match store.last_timestamp(&id, filter.as_ref()) {
                Some(ts) => println!("{}", ts.to_rfc3339()),
                None => println!("never"),
            }
        }
        Command::Show { record_id } => {
            let record = store
                .get(record_id)
                .ok_or_else(|| format!("no record with id {record_id}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_details(&record);
            }
        }
        Command::Delete { record_id } => {
            let record = store
                .get(record_id)
                .ok_or_else(|| format!("no record with id {record_id}"))?;
            if !store.delete(&record) {
                return Err(format!("record {record_id} was not deleted").into());
            }
            println!("deleted {record_id}");
        }
        Command::Clear => {
            store.clear().wait()?;
            println!("cleared");
        }
        Command::Emit { event, arg } => {
            let event = event.build(arg.as_deref())?;
            capture_and_sync(store, event, None)?;
        }
    }
    Ok(())
}

fn capture_and_sync(
    store: &EventStore,
    event: Event,
    at: Option<DateTime<Utc>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = event.id.clone();
    store.capture(event, at);
    store.sync()?;
    tracing::info!(event_id = %id, "Event captured");
    Ok(())
}

fn parse_params(input: Option<&str>) -> Result<ParameterSet, eventviewer::EventError> {
    input.map_or_else(|| Ok(ParameterSet::new()), ParameterSet::from_json_str)
}

/// `None` when no filter (or an empty one) was given.
fn parse_filter(input: Option<&str>) -> Result<Option<ParameterSet>, eventviewer::EventError> {
    let set = parse_params(input)?;
    Ok((!set.is_empty()).then_some(set))
}

fn format_record(record: &EventRecord) -> String {
    let params = serde_json::to_string(&record.parameter_set()).unwrap_or_default();
    format!(
        "{:>6}  {}  {}  {}",
        record.record_id,
        record.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.id,
        params
    )
}

fn print_details(record: &EventRecord) {
    println!("record:     {}", record.record_id);
    println!("id:         {}", record.id);
    if !record.name.is_empty() {
        println!("name:       {}", record.name);
    }
    println!("created at: {}", record.created_at.to_rfc3339());
    if record.parameters.is_empty() {
        println!("parameters: none");
    } else {
        println!("parameters:");
        for parameter in &record.parameters {
            let value = serde_json::to_string(&parameter.value).unwrap_or_default();
            println!("  {} ({}) = {}", parameter.key, parameter.value.kind(), value);
        }
    }
}
