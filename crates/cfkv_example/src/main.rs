//! Walkthrough client for the index layer.
//!
//! Runs the table, index and MOB flows of a typical client session against
//! an in-process `MemStore`, logging each step.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use cfkv_index::{
    add_column_family, create_index, create_table, delete_row, drop_index, drop_table,
    flush_table, get_row, list_indexes, put_batch, put_row, scan, ClientContext, IndexConfig,
    IndexSpec, ScanQuery,
};
use cfkv_store::{
    Column, ColumnFamilyDescriptor, Compression, DataBlockEncoding, Delete, MemStore, Predicate,
    Put, Row, TableDescriptor, TableName, ValueType,
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const FAMILY: &str = "info";
const EDUCATION_FAMILY: &str = "education";

/// key, name, sex, age, address
const SAMPLE_ROWS: [(&str, &str, &str, &str, &str); 6] = [
    ("2017122601", "zhang san", "M", "18", "beijing"),
    ("2017122602", "li si", "F", "22", "shanghai"),
    ("2017122603", "wang wu", "M", "35", "guangzhou"),
    ("2017122604", "zhang san", "F", "27", "shenzhen"),
    ("2017122605", "zhao liu", "F", "18", "hangzhou"),
    ("2017122606", "sun qi", "M", "41", "chengdu"),
];

#[derive(Parser, Debug)]
#[command(name = "cfkv-example")]
#[command(about = "Replays table, index and MOB operations against an in-process store", long_about = None)]
struct Args {
    /// Override how long schema changes wait for in-flight operations.
    #[arg(long)]
    drain_timeout: Option<humantime::Duration>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create, load, query, index, alter and drop a sample table.
    Walkthrough(WalkthroughArgs),
    /// Store and read back a value large enough for out-of-line storage.
    Mob(MobArgs),
}

#[derive(Parser, Debug, Clone)]
struct WalkthroughArgs {
    #[arg(long, default_value = "people")]
    table: String,

    #[arg(long, default_value = "index_name")]
    index_name: String,

    /// Name looked up through the index.
    #[arg(long, default_value = "zhang san")]
    lookup: String,
}

#[derive(Parser, Debug, Clone)]
struct MobArgs {
    #[arg(long, default_value = "mob_table")]
    table: String,

    /// Values at or above this many bytes go out of line.
    #[arg(long, default_value_t = 10)]
    threshold: u64,

    #[arg(long, default_value_t = 1000)]
    value_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cfkv_index=info,cfkv_example=info,warn")),
        )
        .init();

    let args = Args::parse();
    let mut config = IndexConfig::from_env()?;
    if let Some(timeout) = args.drain_timeout {
        config.schema_drain_timeout = timeout.into();
    }
    let ctx = ClientContext::new(Arc::new(MemStore::new()), config);

    match args.cmd {
        Command::Walkthrough(args) => walkthrough(&ctx, args).await,
        Command::Mob(args) => mob(&ctx, args).await,
    }
}

async fn walkthrough(ctx: &ClientContext, args: WalkthroughArgs) -> Result<()> {
    let table = TableName::new(args.table);

    let descriptor = TableDescriptor::new(table.clone()).with_family(
        ColumnFamilyDescriptor::new(FAMILY)
            .with_encoding(DataBlockEncoding::PrefixTree)
            .with_compression(Compression::Snappy),
    );
    create_table(ctx, descriptor).await?;

    // Ctrl-C stops the load between puts.
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let puts = SAMPLE_ROWS
        .iter()
        .map(|(key, name, sex, age, address)| {
            Put::new(*key)
                .with_column(FAMILY, "name", *name)
                .with_column(FAMILY, "sex", *sex)
                .with_column(FAMILY, "age", *age)
                .with_column(FAMILY, "address", *address)
        })
        .collect();
    let batch = put_batch(ctx, &table, puts, &cancel).await?;
    watcher.abort();
    if batch.cancelled {
        bail!("load cancelled after {} rows", batch.applied);
    }
    info!(table = %table, rows = batch.applied, "sample rows loaded");

    let projection = [Column::new(FAMILY, "name"), Column::new(FAMILY, "age")];
    match get_row(ctx, &table, b"2017122601", &projection).await? {
        Some(row) => print_row("get", &row),
        None => warn!(table = %table, "sample row missing"),
    }

    let rows = scan(
        ctx,
        &table,
        ScanQuery::new()
            .with_column(FAMILY, "name")
            .with_column(FAMILY, "address"),
    )
    .await?
    .collect_rows()
    .await?;
    print_rows("scan", &rows);

    let rows = scan(
        ctx,
        &table,
        ScanQuery::new().with_predicate(Predicate::equals(FAMILY, "sex", "F")),
    )
    .await?
    .collect_rows()
    .await?;
    print_rows("filter sex=F", &rows);

    let spec = create_index(
        ctx,
        &table,
        IndexSpec::new(table.clone(), args.index_name, FAMILY, "name", ValueType::String),
    )
    .await?;
    for spec in list_indexes(ctx, &table).await? {
        info!(index = %spec.name, column = %spec.column, state = ?spec.state, "index registered");
    }

    let query = ScanQuery::new().with_predicate(Predicate::equals(FAMILY, "name", args.lookup.as_str()));
    let scanner = scan(ctx, &table, query).await?;
    info!(indexed = scanner.plan().is_indexed(), "lookup planned");
    let found = scanner.collect_rows().await?;
    print_rows(&format!("index lookup name={}", args.lookup), &found);

    add_column_family(ctx, &table, ColumnFamilyDescriptor::new(EDUCATION_FAMILY)).await?;
    let outcome = put_row(
        ctx,
        &table,
        Put::new("2017122601").with_column(EDUCATION_FAMILY, "school", "peking university"),
    )
    .await?;
    report_warnings(&outcome.index_warnings);

    let outcome = delete_row(ctx, &table, Delete::row("2017122606")).await?;
    report_warnings(&outcome.index_warnings);
    let remaining = scan(ctx, &table, ScanQuery::new()).await?.collect_rows().await?;
    print_rows("after delete", &remaining);

    drop_index(ctx, &table, &spec.name).await?;
    drop_table(ctx, &table).await?;
    info!(table = %table, "walkthrough finished");
    Ok(())
}

async fn mob(ctx: &ClientContext, args: MobArgs) -> Result<()> {
    let table = TableName::new(args.table);
    let descriptor = TableDescriptor::new(table.clone())
        .with_family(ColumnFamilyDescriptor::new(FAMILY).with_mob(args.threshold));
    create_table(ctx, descriptor).await?;

    let value = Bytes::from(vec![b'x'; args.value_size]);
    put_row(ctx, &table, Put::new("mob_row").with_column(FAMILY, "blob", value.clone())).await?;
    flush_table(ctx, &table).await?;

    let row = get_row(ctx, &table, b"mob_row", &[])
        .await?
        .context("mob row missing after flush")?;
    let stored = row
        .value(FAMILY, "blob")
        .context("mob cell missing after flush")?;
    if stored != value.as_ref() {
        bail!(
            "mob value changed: wrote {} bytes, read {} bytes",
            value.len(),
            stored.len()
        );
    }
    info!(table = %table, bytes = stored.len(), threshold = args.threshold, "mob value read back");

    drop_table(ctx, &table).await?;
    Ok(())
}

fn print_rows(label: &str, rows: &[Row]) {
    println!("{label}: {} row(s)", rows.len());
    for row in rows {
        print_row(label, row);
    }
}

fn print_row(label: &str, row: &Row) {
    let cells: Vec<String> = row
        .cells
        .iter()
        .map(|(column, cell)| format!("{column}={}", String::from_utf8_lossy(&cell.value)))
        .collect();
    println!("  [{label}] {} {}", row.key_display(), cells.join(" "));
}

fn report_warnings(warnings: &[cfkv_index::IndexInconsistency]) {
    for warning in warnings {
        warn!(warning = %warning, "index may be stale; rebuild to repair");
    }
}
