use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use reqwest::Client;
use serde_json::{json, Map, Value};

use frasertickets_server::cli::{fail, parse_args, setup};
use frasertickets_server::models::{UserKey, UserPatch};
use frasertickets_server::providers::IdentityProvider;
use frasertickets_server::state::{connect_store, identity_client};
use frasertickets_server::store::Store;

/// Revoke admin rights from the user with the given student number.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    student_number: String,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = setup();
    let store = connect_store(&config).await?;
    let user = store
        .find_user(UserKey::StudentNumber(&args.student_number))
        .await
        .with_context(|| format!("no user with student number {}", args.student_number))?;

    let mut claims = Map::new();
    claims.insert("admin".to_string(), Value::Bool(false));
    identity_client(&config, Client::new())
        .set_custom_claims(&user.id, claims)
        .await
        .with_context(|| format!("could not clear admin claim for {}", user.id))?;

    if user.admin {
        store
            .update_user(&user.id, &UserPatch::admin(false))
            .await
            .context("could not clear admin flag")?;
    }

    tracing::info!(audit = true, uid = %user.id, "Admin revoked");
    println!("{}", json!({ "uid": user.id, "admin": false }));
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
