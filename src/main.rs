use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use tallybook::model::BusinessKind;
use tallybook::Store;

#[derive(Debug, Parser)]
#[command(name = "tallybook", about = "Local bookkeeping store", version)]
struct Cli {
    /// Database file to operate on. Defaults to the per-user data
    /// directory, or $TALLYBOOK_DB when set.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Open the store, run pending migrations and report its contents.
    Status {
        /// Emit a machine-readable JSON object instead of the table view.
        #[arg(long)]
        json: bool,
    },
    /// Apply pending migrations and exit.
    Migrate,
    /// First-run setup: write the business profile and seed defaults.
    Onboard {
        #[arg(long, value_enum)]
        kind: KindArg,
        /// Business name shown on invoices and reports.
        #[arg(long)]
        name: String,
    },
    /// Income, expenses and cash position over a date range.
    Summary {
        /// Range start, epoch milliseconds inclusive.
        #[arg(long)]
        from: i64,
        /// Range end, epoch milliseconds inclusive.
        #[arg(long)]
        to: i64,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    General,
    Legal,
}

impl From<KindArg> for BusinessKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::General => BusinessKind::General,
            KindArg::Legal => BusinessKind::Legal,
        }
    }
}

fn main() {
    tallybook::init_logging();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let Cli { db, command } = cli;
    let db_path = match db {
        Some(path) => path,
        None => default_db_path().context("determine database path")?,
    };

    let runtime = tokio::runtime::Runtime::new().context("start async runtime")?;
    runtime.block_on(async {
        let store = Store::open(&db_path)
            .await
            .with_context(|| format!("open store at {}", db_path.display()))?;
        match command {
            Commands::Status { json } => status(&store, &db_path, json).await,
            Commands::Migrate => migrate(&store),
            Commands::Onboard { kind, name } => onboard(&store, kind, &name).await,
            Commands::Summary { from, to, json } => summary(&store, from, to, json).await,
        }
    })
}

async fn status(store: &Store, db_path: &Path, emit_json: bool) -> Result<i32> {
    let version = store.schema_version().await?;
    let counts = store.collection_counts().await?;
    let config = store.business_config().await?;

    if emit_json {
        let collections: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(collection, rows)| (collection.as_str().to_string(), json!(rows)))
            .collect();
        let payload = json!({
            "path": db_path.display().to_string(),
            "schema_version": version,
            "business": config.as_ref().map(|c| json!({
                "name": c.business_name,
                "kind": c.business_kind.as_str(),
                "setup_complete": c.setup_complete,
            })),
            "collections": collections,
        });
        let serialized =
            serde_json::to_string_pretty(&payload).context("serialize status payload")?;
        println!("{serialized}");
    } else {
        println!("Store          : {}", db_path.display());
        println!("Schema version : {version}");
        match &config {
            Some(config) => println!(
                "Business       : {} ({})",
                config.business_name,
                config.business_kind.as_str()
            ),
            None => println!("Business       : not set up"),
        }
        println!("\n{:<20} {:>8}", "Collection", "Rows");
        for (collection, rows) in &counts {
            println!("{:<20} {:>8}", collection.as_str(), rows);
        }
    }
    Ok(0)
}

fn migrate(store: &Store) -> Result<i32> {
    let summary = store.migration_summary();
    if summary.steps_applied == 0 {
        println!(
            "Schema already current at v{}; nothing to apply.",
            summary.version
        );
    } else {
        println!(
            "Migrated v{} -> v{} ({} steps).",
            summary.previous_version, summary.version, summary.steps_applied
        );
        if summary.seed.seeded_anything() {
            println!(
                "Seeded {} categories, {} accounts, {} clients, {} client files.",
                summary.seed.categories,
                summary.seed.accounts,
                summary.seed.clients,
                summary.seed.client_files
            );
        }
    }
    Ok(0)
}

async fn onboard(store: &Store, kind: KindArg, name: &str) -> Result<i32> {
    let profile_id = store
        .complete_onboarding(kind.into(), name)
        .await
        .context("complete onboarding")?;
    println!("Business profile {profile_id} ready.");
    Ok(0)
}

async fn summary(store: &Store, from: i64, to: i64, emit_json: bool) -> Result<i32> {
    let report = store
        .dashboard_summary(from, to)
        .await
        .context("compute summary")?;
    if emit_json {
        let serialized = serde_json::to_string_pretty(&report).context("serialize summary")?;
        println!("{serialized}");
    } else {
        println!("{:<15} {:>14}", "Revenue", cents(report.total_revenue));
        println!("{:<15} {:>14}", "Expenses", cents(report.total_expenses));
        println!("{:<15} {:>14}", "Net income", cents(report.net_income));
        println!("{:<15} {:>14}", "Cash balance", cents(report.cash_balance));
    }
    Ok(0)
}

/// Integer cents rendered as a decimal string.
fn cents(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn default_db_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("TALLYBOOK_DB") {
        return Ok(PathBuf::from(path));
    }

    let base = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .ok_or_else(|| anyhow::anyhow!("failed to resolve application data directory"))?;
    Ok(base.join("tallybook").join("tallybook.sqlite3"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_renders_signed_decimals() {
        assert_eq!(cents(0), "0.00");
        assert_eq!(cents(5), "0.05");
        assert_eq!(cents(123456), "1234.56");
        assert_eq!(cents(-1907), "-19.07");
    }
}
