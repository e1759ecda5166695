use anyhow::{bail, Context, Result};
use serde::Serialize;

use beagle_store::{Config, CountryScoreStore, FingerprintStore, Store, UserStore};

const USAGE: &str = "usage: beagle-store <urls|remindees|countries|checksums|scores>";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        bail!(USAGE);
    };

    let config = Config::load().context("failed to load configuration")?;
    let store = Store::from_config(&config)
        .await
        .with_context(|| format!("failed to open store at {}", config.db_path))?;

    match command.as_str() {
        "urls" => print_json(&UserStore::new(store).urls().await?),
        "remindees" => print_json(&UserStore::new(store).remindees().await?),
        "countries" => print_json(&UserStore::new(store).countries().await?),
        "checksums" => print_json(&FingerprintStore::new(store).all().await?),
        "scores" => print_json(&CountryScoreStore::new(store).all().await?),
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
