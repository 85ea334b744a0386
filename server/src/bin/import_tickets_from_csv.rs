use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use uuid::Uuid;

use frasertickets_server::cli::{fail, parse_args, setup};
use frasertickets_server::models::ScanLimit;
use frasertickets_server::services::import::{import_csv, ColumnMapping};
use frasertickets_server::state::connect_store;
use frasertickets_server::store::Store;

/// Queue a ticket for every student in a CSV export. Students who already
/// have an account get their ticket immediately.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    event_id: String,

    csv_filename: PathBuf,

    /// 1-based column holding "Last, First" names.
    #[arg(long)]
    name_column: Option<usize>,

    /// 1-based column holding student numbers.
    #[arg(long)]
    student_number_column: Option<usize>,

    /// 1-based column holding per-row max scan counts, 0 for none.
    #[arg(long)]
    max_scan_count_column: Option<usize>,

    /// Max scan count for rows without one, 0 for unlimited.
    #[arg(long)]
    default_max_scan_count: Option<u32>,
}

fn prompt<T: std::str::FromStr>(question: &str, accept_blank: Option<T>) -> anyhow::Result<T> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{question}: ");
        io::stdout().flush()?;
        let Some(line) = lines.next().transpose()? else {
            bail!("stdin closed before '{question}' was answered");
        };
        let line = line.trim();
        if line.is_empty() {
            if let Some(value) = accept_blank {
                return Ok(value);
            }
        } else if let Ok(value) = line.parse() {
            return Ok(value);
        }
        println!("invalid answer '{line}'");
    }
}

fn column(flag: Option<usize>, question: &str) -> anyhow::Result<usize> {
    let one_based = match flag {
        Some(value) => value,
        None => prompt(question, None)?,
    };
    one_based
        .checked_sub(1)
        .with_context(|| format!("column numbers start at 1, got {one_based}"))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = setup();
    let event_id = Uuid::parse_str(&args.event_id)
        .with_context(|| format!("invalid event id '{}'", args.event_id))?;
    let mut reader = csv::Reader::from_path(&args.csv_filename)
        .with_context(|| format!("could not open {}", args.csv_filename.display()))?;
    let width = reader
        .headers()
        .with_context(|| format!("could not read the header of {}", args.csv_filename.display()))?
        .len();

    let name = column(args.name_column, "Name column (1-based)")?;
    let student_number = column(
        args.student_number_column,
        "Student number column (1-based)",
    )?;
    let max_scan_count = match args.max_scan_count_column {
        Some(index) => index,
        None => prompt("Max scan count column (1-based, blank for none)", Some(0))?,
    }
    .checked_sub(1);
    let default_max = match args.default_max_scan_count {
        Some(value) => value,
        None => prompt("Default max scan count (0 for unlimited)", None)?,
    };
    let mapping = ColumnMapping {
        name,
        student_number,
        max_scan_count,
    };
    mapping.check_width(width).with_context(|| {
        format!("{} does not fit the column mapping", args.csv_filename.display())
    })?;

    let store = connect_store(&config).await?;
    if !store.event_exists(event_id).await? {
        bail!("event {event_id} does not exist");
    }

    tracing::info!(%event_id, ?mapping, default_max, "Importing tickets");
    let report = import_csv(
        Arc::new(store),
        event_id,
        reader,
        mapping,
        ScanLimit::from(default_max),
        config.batch_concurrency,
    )
    .await;
    println!("{report}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Args = match parse_args() {
        Ok(args) => args,
        Err(code) => return code,
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}
