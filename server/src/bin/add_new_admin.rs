use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use reqwest::Client;
use serde_json::{json, Map, Value};

use frasertickets_server::cli::{fail, parse_args, setup};
use frasertickets_server::models::{ModelError, UserPatch};
use frasertickets_server::providers::IdentityProvider;
use frasertickets_server::state::{connect_store, identity_client};
use frasertickets_server::store::Store;

/// Grant admin rights to an identity account.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    uid: String,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = setup();
    let identity = identity_client(&config, Client::new());

    let mut claims = Map::new();
    claims.insert("admin".to_string(), Value::Bool(true));
    identity
        .set_custom_claims(&args.uid, claims)
        .await
        .with_context(|| format!("could not set admin claim for {}", args.uid))?;

    let store = connect_store(&config).await?;
    match store.update_user(&args.uid, &UserPatch::admin(true)).await {
        Ok(()) | Err(ModelError::NoDocumentModified) => {}
        Err(e) => return Err(e).context("could not flag user as admin"),
    }

    tracing::info!(audit = true, uid = %args.uid, "Admin granted");
    println!("{}", json!({ "uid": args.uid, "admin": true }));
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
