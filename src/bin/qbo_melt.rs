//! qbo-melt: Flatten QuickBooks Online payloads into CSV tables
//!
//! Usage:
//!   # Melt captured entity records with a mapping document
//!   qbo-melt entities --mapping mappings.json --endpoint Invoice invoices.json -o ./out
//!
//!   # Melt a single report payload
//!   qbo-melt report --name BalanceSheet --method cash balance_sheet.json -o ./out
//!
//!   # Replay a whole configured run from a directory of captured responses
//!   qbo-melt run --config config.json --mapping mappings.json --source ./captures -o ./out
//!
//!   # One pass per input table row (PK,report,start_date,end_date,segment_data_by)
//!   qbo-melt run --config config.json --mapping mappings.json --source ./captures \
//!       --input-table periods.csv -o ./out

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use qbo_furnace::extract::{Extractor, ReplaySource};
use qbo_furnace::melt::report::{AccountingMethod, ReportFlattener};
use qbo_furnace::melt::{
    KeyGenerator, MappingCatalog, MeltConfig, SequentialKeys, TableSink, UuidKeys,
};
use qbo_furnace::{melt_entities, ExtractorConfig, InputTable};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "qbo-melt")]
#[command(about = "Flatten QuickBooks Online payloads into CSV tables", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Melt entity records (array, single object, QueryResponse or NDJSON)
    Entities {
        /// Mapping document describing every endpoint
        #[arg(long)]
        mapping: PathBuf,

        /// Endpoint the records belong to
        #[arg(long)]
        endpoint: String,

        /// Input file (use stdin if omitted)
        #[arg(value_name = "FILE")]
        input: Option<PathBuf>,

        /// Output directory for one .csv file per table
        #[arg(long, short = 'o')]
        output_dir: PathBuf,

        /// Flag written tables as incremental in their manifests
        #[arg(long)]
        incremental: bool,

        /// Use `<table>-N` join keys instead of random ones
        #[arg(long)]
        sequential_keys: bool,
    },

    /// Melt one report payload
    Report {
        /// Report name, e.g. BalanceSheet or CustomQuery
        #[arg(long)]
        name: String,

        /// Accounting method the payload was fetched with (accrual or cash)
        #[arg(long)]
        method: Option<AccountingMethod>,

        /// Query text, required for CustomQuery
        #[arg(long)]
        query: Option<String>,

        /// Input file (use stdin if omitted)
        #[arg(value_name = "FILE")]
        input: Option<PathBuf>,

        #[arg(long, short = 'o')]
        output_dir: PathBuf,

        #[arg(long)]
        incremental: bool,
    },

    /// Run a configured extraction against captured API responses
    Run {
        /// Connector configuration file
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        mapping: PathBuf,

        /// Directory holding `<Endpoint>.json` and `<Report>[_<method>].json` captures
        #[arg(long)]
        source: PathBuf,

        /// CSV input table driving one pass per row
        #[arg(long)]
        input_table: Option<PathBuf>,

        #[arg(long, short = 'o')]
        output_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Entities {
            mapping,
            endpoint,
            input,
            output_dir,
            incremental,
            sequential_keys,
        } => {
            let catalog = MappingCatalog::from_path(&mapping, &MeltConfig::default())
                .with_context(|| format!("Failed to load mapping {}", mapping.display()))?;
            let records = entity_records(&endpoint, read_values(input)?);
            let mut sink = TableSink::new(&output_dir, incremental)?;

            let written = if sequential_keys {
                melt_with(&catalog, &endpoint, &records, SequentialKeys::new(), &mut sink)?
            } else {
                melt_with(&catalog, &endpoint, &records, UuidKeys, &mut sink)?
            };
            sink.write_manifests()?;
            log::info!("Melted {} records of {} into {} rows", records.len(), endpoint, written);
        }

        Command::Report {
            name,
            method,
            query,
            input,
            output_dir,
            incremental,
        } => {
            let mut flattener = ReportFlattener::new(name.as_str());
            if let Some(method) = method {
                flattener = flattener.with_accounting_method(method);
            }
            if let Some(query) = query {
                flattener = flattener.with_query(query);
            }

            let mut sink = TableSink::new(&output_dir, incremental)?;
            for payload in read_values(input)? {
                let table = flattener
                    .flatten(&payload)
                    .with_context(|| format!("Failed to flatten report {}", name))?;
                sink.write_report(&table)?;
            }
            sink.write_manifests()?;
        }

        Command::Run {
            config,
            mapping,
            source,
            input_table,
            output_dir,
        } => {
            let config = ExtractorConfig::from_path(&config)
                .with_context(|| format!("Failed to load configuration {}", config.display()))?;
            let today = chrono::Local::now().date_naive();

            let (plans, incremental) = match input_table {
                Some(path) => {
                    let table = InputTable::from_path(&path).with_context(|| {
                        format!("Failed to load input table {}", path.display())
                    })?;
                    let incremental = config.incremental() || table.forces_incremental();
                    (config.input_table_plans(&table, today)?, incremental)
                }
                None => (vec![config.run_plan(today)?], config.incremental()),
            };
            log::info!("Load type incremental set to: {}", incremental);

            let melt_config = MeltConfig {
                incremental,
                ..MeltConfig::default()
            };
            let catalog = MappingCatalog::from_path(&mapping, &melt_config)
                .with_context(|| format!("Failed to load mapping {}", mapping.display()))?;

            log::info!("Starting extraction for company {}", config.company_id);
            let sink = TableSink::new(&output_dir, melt_config.incremental)?;
            let mut extractor = Extractor::new(
                ReplaySource::new(&source),
                &catalog,
                sink,
                melt_config,
                UuidKeys,
            );
            extractor.run_all(&plans)?;
            log::info!("Extraction finished");
        }
    }

    Ok(())
}

fn melt_with<K: KeyGenerator>(
    catalog: &MappingCatalog,
    endpoint: &str,
    records: &[Value],
    keys: K,
    sink: &mut TableSink,
) -> Result<usize> {
    melt_entities(catalog, endpoint, records, keys, sink)
        .with_context(|| format!("Failed to melt {} records", endpoint))
}

/// Parse input with simd-json, falling back to serde_json for NDJSON
fn read_values(input: Option<PathBuf>) -> Result<Vec<Value>> {
    let reader = match &input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        )) as Box<dyn Read>,
        None => Box::new(std::io::stdin()) as Box<dyn Read>,
    };

    let mut content = Vec::new();
    BufReader::new(reader).read_to_end(&mut content)?;

    // simd-json parses in place, keep the original bytes for the fallback
    let mut scratch = content.clone();
    if let Ok(value) = simd_json::serde::from_slice::<Value>(&mut scratch) {
        return Ok(vec![value]);
    }

    let mut values = Vec::new();
    for (idx, line) in String::from_utf8_lossy(&content).lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("Failed to parse JSON on line {}", idx + 1))?;
        values.push(value);
    }

    if values.is_empty() {
        bail!("No JSON input found");
    }
    Ok(values)
}

/// Records of an endpoint from arrays, single objects or `QueryResponse` wrappers
fn entity_records(endpoint: &str, values: Vec<Value>) -> Vec<Value> {
    values
        .into_iter()
        .flat_map(|value| match value {
            Value::Array(items) => items,
            Value::Object(mut fields) if fields.contains_key("QueryResponse") => {
                let records = fields
                    .remove("QueryResponse")
                    .and_then(|mut response| response.get_mut(endpoint).map(Value::take));
                match records {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                }
            }
            other => vec![other],
        })
        .collect()
}
