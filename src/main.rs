use anyhow::{anyhow, bail, Result};
use cnamecrab::{Authenticator, Config, Shared};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "/path/to/config.json <publish|remove|resolve> [domain] [value]";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let mut args = std::env::args();
    let program_name = args.next().unwrap_or("cnamecrab".to_string());
    let (config_file, command) = match (args.next(), args.next()) {
        (Some(config_file), Some(command)) => (config_file, command),
        _ => bail!("usage: {program_name} {USAGE}"),
    };
    // Certbot manual hooks pass the challenge through the environment.
    let domain = args
        .next()
        .or_else(|| std::env::var("CERTBOT_DOMAIN").ok())
        .ok_or_else(|| anyhow!("no domain given and CERTBOT_DOMAIN is unset"))?;
    let value = args.next().or_else(|| std::env::var("CERTBOT_VALIDATION").ok());

    let config = config_init(&config_file)?;
    let authenticator = Authenticator::new(config.clone())?;

    match command.as_str() {
        "publish" => {
            let value = value
                .ok_or_else(|| anyhow!("no value given and CERTBOT_VALIDATION is unset"))?;
            let resolution = authenticator.publish(&domain, &value).await?;
            tracing::info!("published challenge for {domain}: {resolution}");
            tracing::info!(
                "waiting {}s for propagation",
                config.propagation_seconds.as_secs()
            );
            tokio::time::sleep(config.propagation_seconds).await;
        }
        "remove" => {
            let resolution = authenticator
                .remove(&domain, value.as_deref().unwrap_or_default())
                .await?;
            tracing::info!("removed challenge for {domain}: {resolution}");
        }
        "resolve" => {
            let resolution = authenticator.resolve(&domain).await?;
            println!("{resolution}");
        }
        _ => bail!("unknown command \"{command}\", usage: {program_name} {USAGE}"),
    }
    Ok(())
}

fn tracing_init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cnamecrab=info".into()),
        )
        .init();
}

fn config_init(config_file: &str) -> Result<Shared> {
    let config = Config::try_from_file(config_file)?;
    tracing::debug!("loaded config from {config_file}");
    Ok(Arc::new(config))
}
