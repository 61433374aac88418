//! kvtable command-line tool
//!
//! - `demo`: create the UTXO transfer table, batch insert, run point, range
//!   and secondary-index selects
//! - `dump`: print raw key/value pairs in store order
//! - `compact`: rewrite the durable log as a single snapshot
//! - `init-config`: print a default TOML config
//!
//! # Examples
//!
//! ```bash
//! kvtable --backend log --data-dir ./data demo
//! kvtable --backend log --data-dir ./data dump --limit 20
//! kvtable init-config > kvtable.toml
//! kvtable --config kvtable.toml compact
//! ```

use clap::{Args, Parser, Subcommand};
use kvtable::catalog::{ColumnDef, Constraint};
use kvtable::query::statement::{CreateTable, Insert, Literal, Select};
use kvtable::{BackendKind, Database, StoreConfig, StoreRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const UTXO_TABLE: &str = "utxo_asset_transfer_1542610800000_1542614399999";

/// kvtable - SQL tables over an ordered key-value store
#[derive(Parser, Debug)]
#[command(name = "kvtable")]
#[command(version = kvtable::VERSION)]
#[command(about = "SQL tables over an ordered key-value store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file
    #[arg(long, global = true, env = "KVTABLE_CONFIG")]
    config: Option<PathBuf>,

    /// Backend (memory, log); overrides the config file
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// Parent directory of the store; overrides the config file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Store name; overrides the config file
    #[arg(long, global = true)]
    name: Option<String>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "KVTABLE_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the UTXO smoke scenario
    Demo(DemoArgs),

    /// Print raw key/value pairs
    Dump {
        /// Maximum pairs to print (0 = all)
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Compact the durable log
    Compact,

    /// Print a default config file
    InitConfig,
}

#[derive(Args, Debug)]
struct DemoArgs {
    /// How many times the 26-row batch is inserted
    #[arg(long, default_value = "4")]
    batches: usize,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig = cli.command {
        print!("{}", StoreConfig::default().to_toml()?);
        return Ok(());
    }

    setup_logging(&cli)?;
    let config = store_config(&cli)?;

    let registry = StoreRegistry::new();
    let db = registry.open(&config)?;

    let outcome = match cli.command {
        Commands::Demo(args) => demo_command(&db, args),
        Commands::Dump { limit } => dump_command(&db, limit),
        Commands::Compact => {
            if config.backend == BackendKind::Memory {
                warn!("Memory stores have nothing to compact");
            }
            db.compact().map_err(Into::into)
        }
        Commands::InitConfig => Ok(()),
    };

    registry.close_all()?;
    outcome
}

/// Config file and env first, then command-line overrides
fn store_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = StoreConfig::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(dir) = &cli.data_dir {
        config.path = dir.clone();
    }
    if let Some(name) = &cli.name {
        config.name = name.clone();
    }
    Ok(config)
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "kvtable.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

fn demo_command(db: &Arc<Database>, args: DemoArgs) -> anyhow::Result<()> {
    info!(version = %kvtable::VERSION, "Running demo scenario");

    create_utxo_table(db)?;
    for _ in 0..args.batches {
        let inserted = db.insert(utxo_batch())?;
        info!(inserted, "Inserted batch");
    }

    print_select(db, "ID=5", Select::from(UTXO_TABLE).where_eq("ID", 5))?;
    print_select(
        db,
        "ID>80 LIMIT 0,10",
        Select::from(UTXO_TABLE).where_gt("ID", 80).limit(0, 10),
    )?;
    print_select(
        db,
        "PUBLICHASH='b813...'",
        Select::from(UTXO_TABLE)
            .columns(["ID", "PUBLICHASH", "TXTYPE"])
            .where_eq("PUBLICHASH", B813),
    )?;
    print_select(
        db,
        "TXTYPE=4",
        Select::from(UTXO_TABLE)
            .columns(["ID", "TXTYPE"])
            .where_eq("TXTYPE", 4),
    )?;
    print_select(
        db,
        "HASH='05df...'",
        Select::from(UTXO_TABLE)
            .columns(["ID", "HASH"])
            .where_eq("HASH", HASH_05),
    )?;

    let counters = db.catalog().get_counters(UTXO_TABLE)?;
    println!("rows={} next_id={}", counters.rows, counters.auto_inc_id);
    Ok(())
}

fn print_select(db: &Database, label: &str, stmt: Select) -> anyhow::Result<()> {
    println!("------------- select where {} -------------", label);
    let mut cursor = db.select(&stmt)?;
    for row in cursor.by_ref() {
        println!("{}", serde_json::to_string(&row)?);
    }
    if let Some(e) = cursor.take_error() {
        return Err(e.into());
    }
    println!("({} rows)", cursor.rows_returned());
    Ok(())
}

fn dump_command(db: &Database, limit: usize) -> anyhow::Result<()> {
    for pair in db.scan_limit(limit)? {
        println!(
            "{} => {}",
            String::from_utf8_lossy(&pair.key),
            String::from_utf8_lossy(&pair.value)
        );
    }
    Ok(())
}

const PUBLIC_ID: &str = "c7e359653648e3576ad8a0bb8683461f611c5aa8ba71db7adc7ad9514c62e9c0";
const B713: &str = "b713df4ed24854aa00864457452712ca473370f4294fe0349991047e09acb39e";
const B813: &str = "b813df4ed24854aa00864457452712ca473370f4294fe0349991047e09acb39e";
const HASH_04: &str = "04dfa58d91e64791e908d4ba8eeecbbb250ee493f0a4ffd1787e91b70226d96f";
const HASH_05: &str = "05dfa58d91e64791e908d4ba8eeecbbb250ee493f0a4ffd1787e91b70226d96f";

fn create_utxo_table(db: &Database) -> anyhow::Result<()> {
    let created = db.create_table(
        &CreateTable::new(UTXO_TABLE)
            .column(ColumnDef::numeric("ID"))
            .column(ColumnDef::text("PUBLICID"))
            .column(ColumnDef::text("PUBLICHASH"))
            .column(ColumnDef::numeric("TXTIME"))
            .column(ColumnDef::text("TXID"))
            .column(ColumnDef::numeric("HASHINDEX"))
            .column(ColumnDef::numeric("TXTYPE"))
            .column(ColumnDef::numeric("AMOUNT"))
            .column(ColumnDef::text("REMARK"))
            .column(ColumnDef::text("HASH"))
            .column(ColumnDef::numeric("PUBLICTYPE"))
            .constraint(Constraint::primary_key("ID"))
            .constraint(Constraint::index(["PUBLICHASH", "TXTIME", "TXTYPE"]))
            .constraint(Constraint::index(["TXTIME"]))
            .constraint(Constraint::index(["HASH", "HASHINDEX", "TXTYPE"]))
            .if_not_exists(),
    )?;
    info!(created, table = UTXO_TABLE, "Table ready");
    Ok(())
}

/// 26 transfers across two public hashes, two tx types and two hashes.
fn utxo_batch() -> Insert {
    let mut insert = Insert::into_table(UTXO_TABLE).columns([
        "PUBLICID",
        "PUBLICHASH",
        "TXTIME",
        "TXID",
        "HASHINDEX",
        "TXTYPE",
        "AMOUNT",
        "REMARK",
        "HASH",
        "PUBLICTYPE",
    ]);
    let groups = [
        (B713, "1", HASH_04, 5),
        (B813, "1", HASH_04, 5),
        (B713, "4", HASH_04, 5),
        (B713, "1", HASH_05, 5),
        (B813, "1", HASH_04, 5),
        (B713, "1", HASH_04, 1),
    ];
    for (public_hash, tx_type, hash, times) in groups {
        for _ in 0..times {
            insert = insert.row([
                Literal::from(PUBLIC_ID),
                public_hash.into(),
                "1542614204182".into(),
                "3a49b0b4db434d5d8a00ea4e9a4920d3".into(),
                "0".into(),
                tx_type.into(),
                "100".into(),
                "yC".into(),
                hash.into(),
                "7".into(),
            ]);
        }
    }
    insert
}
