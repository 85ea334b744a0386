use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use frasertickets_server::cli::{fail, parse_args, setup};
use frasertickets_server::services::cleanup::sweep_queued_tickets;
use frasertickets_server::state::connect_store;

/// Delete queued tickets made redundant by a ticket issued since.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {}

async fn run() -> anyhow::Result<()> {
    let config = setup();
    let store = connect_store(&config).await?;
    let report = sweep_queued_tickets(Arc::new(store), config.batch_concurrency).await?;
    println!("{report}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(code) = parse_args::<Args>() {
        return code;
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}
