//! tabula-admin: operator CLI over a tabula database.
//!
//! Configuration comes from `--config` (YAML), then `TABULA__*` environment
//! variables, then `--dsn`. Every command runs as a member of the configured
//! admin group, so `admin_group_id` must be set.
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tabula_db::{
    EngineConfig, Page, ResourceEngine, SchemaMutator, SchemaRegistry, SchemaSnapshot, connect_db,
};
use tabula_security::{CallerContext, ReferenceId};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tabula-admin")]
#[command(version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the database DSN
    #[arg(long)]
    dsn: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered tables
    Tables {
        /// Include join tables and other hidden tables
        #[arg(long)]
        all: bool,
    },
    /// Print the stored schema of a table
    Schema { table: String },
    /// List live rows of a table
    List {
        table: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Print one row
    Get { table: String, reference: String },
    /// Soft-delete one row
    Delete { table: String, reference: String },
    /// Drop a table along with its relations and join tables
    DropTable { table: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(dsn) = &args.dsn {
        config.database.dsn.clone_from(dsn);
    }
    Ok(config)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn table_summaries(snapshot: &SchemaSnapshot, all: bool) -> Vec<serde_json::Value> {
    snapshot
        .tables()
        .filter(|t| all || !t.is_hidden)
        .map(|t| {
            serde_json::json!({
                "name": t.name,
                "columns": t.columns.len(),
                "relations": t.relations.len(),
                "join_table": t.is_join_table,
            })
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = load_config(&args)?;
    let Some(admin_group) = config.admin_group_id.filter(|g| !g.is_null()) else {
        bail!("admin_group_id is not configured");
    };
    let caller = CallerContext::builder().member_of(admin_group).build();

    let db = connect_db(&config.database.dsn, config.database.connect_opts())
        .await
        .context("connecting to database")?;
    let registry = Arc::new(SchemaRegistry::load(db.connection()).await?);
    tracing::info!(version = registry.snapshot().version(), "registry ready");

    match args.command {
        Command::Tables { all } => {
            print_json(&table_summaries(&registry.snapshot(), all))?;
        }
        Command::Schema { table } => {
            let snapshot = registry.snapshot();
            print_json(snapshot.require(&table)?.as_ref())?;
        }
        Command::List {
            table,
            offset,
            limit,
        } => {
            let engine = ResourceEngine::new(Arc::clone(&registry), &config);
            let tx = db.begin().await?;
            let rows = match limit {
                Some(limit) => {
                    engine
                        .find_page(&table, Page::new(offset, limit), &caller, &tx)
                        .await?
                }
                None => engine.find_all(&table, &caller, &tx).await?,
            };
            tx.commit().await?;
            print_json(&rows)?;
        }
        Command::Get { table, reference } => {
            let reference = ReferenceId::parse(&reference)
                .with_context(|| format!("invalid reference id '{reference}'"))?;
            let engine = ResourceEngine::new(Arc::clone(&registry), &config);
            let tx = db.begin().await?;
            let row = engine.find_one(&table, reference, &caller, &tx).await?;
            tx.commit().await?;
            print_json(&row)?;
        }
        Command::Delete { table, reference } => {
            let reference = ReferenceId::parse(&reference)
                .with_context(|| format!("invalid reference id '{reference}'"))?;
            let engine = ResourceEngine::new(Arc::clone(&registry), &config);
            let tx = db.begin().await?;
            engine.delete(&table, reference, &caller, &tx).await?;
            tx.commit().await?;
            tracing::info!(table, reference = %reference, "row deleted");
        }
        Command::DropTable { table } => {
            let mutator = SchemaMutator::new(db.clone(), Arc::clone(&registry))
                .with_default_permission(config.default_permission);
            let snapshot = mutator.drop_table(&table).await?;
            tracing::info!(table, version = snapshot.version(), "table dropped");
        }
    }
    Ok(())
}
