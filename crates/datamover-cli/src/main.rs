//! datamover CLI - move tabular data between files, object storage, remote
//! file servers and warehouses.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use datamover::config::{DATASOURCE_PATH_VAR, ENV_VAR};
use datamover::datasource::{self, parse_delimiter};
use datamover::{
    Compression, Config, Datamover, Datasource, EndpointSpec, LoadOptions, MoverError, Result,
    S3Datasource, TransferReport,
};
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "datamover")]
#[command(about = "Move tabular data between heterogeneous endpoints")]
#[command(version)]
struct Cli {
    /// Path to the YAML datasource catalogue
    #[arg(short, long, env = DATASOURCE_PATH_VAR)]
    config: Option<PathBuf>,

    /// Environment to pick datasource entries from
    #[arg(short, long, env = ENV_VAR)]
    env: Option<String>,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy data from one endpoint to another
    Copy {
        /// Source endpoint, e.g. file:in.csv or s3:archive:exports/a.csv
        #[arg(long)]
        from: String,

        /// Sink endpoint, e.g. console: or redshift:dw:public.orders
        #[arg(long)]
        to: String,

        /// Move records one at a time instead of buffering the payload
        #[arg(long)]
        stream: bool,

        /// Column separator of the source data
        #[arg(long)]
        source_delimiter: Option<String>,

        /// Column separator written to the sink
        #[arg(long)]
        delimiter: Option<String>,

        /// Compress the payload before delivery (gzip)
        #[arg(long)]
        compression: Option<String>,

        /// Decrypt the source with the keys under settings.keyring_path
        #[arg(long)]
        decrypt: bool,

        /// Passphrase for the secret key
        #[arg(long, env = "DATAMOVER_GPG_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Encrypt the payload for this recipient (repeatable)
        #[arg(long = "encrypt-for")]
        encrypt_for: Vec<String>,

        /// Store the payload under this name
        #[arg(long)]
        response_target: Option<String>,

        /// Query to export from a SQL source
        #[arg(long)]
        query: Option<String>,

        /// Warehouse load strategy: insert, upsert, bulk_delete_append, truncate
        #[arg(long, default_value = "insert")]
        load_option: String,

        /// Primary key columns for upsert, comma separated
        #[arg(long)]
        primary_key: Option<String>,

        /// Delete rows matching COLUMN=VALUE before appending (repeatable)
        #[arg(long = "bulk-delete")]
        bulk_delete: Vec<String>,

        /// Output the transfer report as JSON to stdout
        #[arg(long)]
        output_json: bool,
    },

    /// Check that a source exists
    Check {
        /// Endpoint to probe
        #[arg(long)]
        source: String,

        /// Query to probe on a SQL source
        #[arg(long)]
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => {
            warn!("Missing ENV['{}']", DATASOURCE_PATH_VAR);
            Config::default()
        }
    };
    let env = cli.env.as_deref();

    match cli.command {
        Commands::Copy {
            from,
            to,
            stream,
            source_delimiter,
            delimiter,
            compression,
            decrypt,
            password,
            encrypt_for,
            response_target,
            query,
            load_option,
            primary_key,
            bulk_delete,
            output_json,
        } => {
            let from: EndpointSpec = from.parse()?;
            let to: EndpointSpec = to.parse()?;
            let source_delimiter = source_delimiter.as_deref().map(parse_delimiter).transpose()?;
            let sink_delimiter = delimiter.as_deref().map(parse_delimiter).transpose()?;
            let compression = compression
                .as_deref()
                .map(str::parse::<Compression>)
                .transpose()?;

            let mut source = datasource::build(&from, &config, env, query.as_deref())?;
            let mut sink = datasource::build(&to, &config, env, None)?;

            if let Some((schema, table)) = to.table() {
                let mut options = LoadOptions::new(load_option);
                if let Some(primary_key) = primary_key {
                    options = options.with_primary_key(primary_key);
                }
                for pair in &bulk_delete {
                    let (column, value) = pair.split_once('=').ok_or_else(|| {
                        MoverError::Config(format!(
                            "invalid --bulk-delete '{}': expected COLUMN=VALUE",
                            pair
                        ))
                    })?;
                    options = options.with_bulk_delete(column, value);
                }
                if let Some(delimiter) = sink_delimiter {
                    options = options.with_delimiter(delimiter);
                }
                if let Some(warehouse) = sink.as_warehouse() {
                    warehouse.set_copy(schema, table, options);
                }
            }

            let mut mover = Datamover::new(config.settings.clone());
            if let Some(staging) = staging_area(&config, env)? {
                mover = mover.with_staging(staging);
            }

            let mut directive = mover.from(&mut *source);
            if let Some(delimiter) = source_delimiter {
                directive = directive.delimiter(delimiter);
            }
            if decrypt {
                directive = directive.decrypt(password);
            }
            let mut transfer = directive.to(&mut *sink);
            if let Some(delimiter) = sink_delimiter {
                transfer = transfer.delimiter(delimiter);
            }
            if let Some(compression) = compression {
                transfer = transfer.compression(compression);
            }
            if !encrypt_for.is_empty() {
                transfer = transfer.encrypt_for(encrypt_for);
            }
            if let Some(name) = response_target {
                transfer = transfer.response_target(name);
            }

            let outcome = if stream {
                transfer.stream().await
            } else {
                transfer.run().await
            };
            let report = match outcome {
                Ok(report) => report,
                Err(e) => {
                    for entry in mover.logs() {
                        eprintln!("  {}", entry);
                    }
                    return Err(e);
                }
            };

            if output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                summarize(&report);
            }
        }

        Commands::Check { source, query } => {
            let spec: EndpointSpec = source.parse()?;
            let mut source = datasource::build(&spec, &config, env, query.as_deref())?;
            let name = source.display_name();
            if !source.exists().await? {
                return Err(MoverError::SourceEmpty(format!(
                    "no data returned from {}",
                    name
                )));
            }
            println!("{} exists", name);
        }
    }

    Ok(())
}

/// Staging area for warehouse loads, when settings name one.
fn staging_area(config: &Config, env: Option<&str>) -> Result<Option<S3Datasource>> {
    let (Some(staging), Some(env)) = (&config.settings.staging, env) else {
        return Ok(None);
    };
    let s3 = config.s3(&staging.datasource, env)?;
    Ok(Some(S3Datasource::new(s3)))
}

fn summarize(report: &TransferReport) {
    if let Some(records) = report.records {
        info!("Transferred {} records", records);
    }
    if let Some(bytes) = report.bytes {
        info!("Transferred {} bytes", bytes);
    }
    if let Some(name) = &report.response_target {
        info!("Stored as {}", name);
    }
    if let Some(load) = &report.load {
        info!(
            "Loaded with {}: {} staged, {} deleted, {} inserted",
            load.strategy, load.rows_staged, load.rows_deleted, load.rows_inserted
        );
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout is reserved for console sinks and reports
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
