// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use rank_split::config::{init_tracing, Settings};
use rank_split::db::{self, load_members_csv, insert_members};
use rank_split::open_database;

/// Rank-weighted party expense settlement
#[derive(Parser)]
#[command(name = "rank-split")]
#[command(about = "Split party expenses across members by rank", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database file (overrides RANK_SPLIT_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,
    /// Import members from a `name,rank` CSV
    ImportMembers {
        csv: PathBuf,
    },
    /// Print the settlement of a party
    Settle {
        party_id: i64,
    },
    /// Write the settlement of a party to CSV
    Export {
        party_id: i64,
        csv: PathBuf,
    },
    /// Interactive terminal UI (default)
    Ui,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if let Some(db_path) = cli.db {
        settings.db_path = db_path;
    }

    match cli.command.unwrap_or(Command::Ui) {
        Command::Init => {
            init_tracing();
            run_init(&settings)
        }
        Command::ImportMembers { csv } => {
            init_tracing();
            run_import_members(&settings, &csv)
        }
        Command::Settle { party_id } => {
            init_tracing();
            run_settle(&settings, party_id)
        }
        Command::Export { party_id, csv } => {
            init_tracing();
            run_export(&settings, party_id, &csv)
        }
        // Log output would draw over the alternate screen
        Command::Ui => run_ui_mode(settings),
    }
}

fn run_init(settings: &Settings) -> Result<()> {
    open_database(&settings.db_path)?;
    println!("✓ Database ready at {}", settings.db_path.display());
    Ok(())
}

fn run_import_members(settings: &Settings, csv_path: &Path) -> Result<()> {
    let members = load_members_csv(csv_path)?;
    println!("✓ Loaded {} members from {}", members.len(), csv_path.display());

    let conn = open_database(&settings.db_path)?;
    let count = insert_members(&conn, &members)?;
    println!("✓ Imported {} members", count);
    Ok(())
}

fn run_settle(settings: &Settings, party_id: i64) -> Result<()> {
    let conn = open_database(&settings.db_path)?;
    let party = db::get_party(&conn, party_id)?
        .with_context(|| format!("Party {} not found", party_id))?;
    let report = db::settle_party(&conn, party_id, settings.rate_policy)?;

    println!("{} ({})", party.name, party.date);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{:<24} {:>5} {:>10} {:>10} {:>10}", "Name", "Rank", "To pay", "Paid", "Balance");
    for row in &report.rows {
        println!(
            "{:<24} {:>5} {:>10} {:>10} {:>+10}",
            row.name, row.rank, row.amount_to_pay, row.paid_amount, row.balance
        );
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Total: {}", report.total_amount);

    if report.degenerate {
        println!("⚠️  No rank rates set; nobody owes anything yet");
    } else if report.normalized {
        println!("⚠️  Rank rates total {:.2}%, shares were rescaled", report.total_rate);
    }
    if report.unattributed_paid > 0 {
        println!("⚠️  {} paid by members who are not participants", report.unattributed_paid);
    }

    Ok(())
}

fn run_export(settings: &Settings, party_id: i64, csv_path: &Path) -> Result<()> {
    let conn = open_database(&settings.db_path)?;
    let report = db::settle_party(&conn, party_id, settings.rate_policy)?;
    db::export_settlement_csv(csv_path, &report.rows)?;
    println!("✓ Wrote {} rows to {}", report.rows.len(), csv_path.display());
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(settings: Settings) -> Result<()> {
    let conn = open_database(&settings.db_path)?;

    let mut app = ui::App::new(conn, settings)?;
    ui::run_ui(&mut app)?;

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_settings: Settings) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin rank-split-server --features server");
    std::process::exit(1);
}
