use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use integra_contador::agent::{ClientContext, ConfigSource, Settings};
use integra_contador::connectors::Endpoint;
use integra_contador::security::TokenCache;
use integra_contador::utils::{self, TaxId};

#[derive(Parser)]
#[command(name = "integra-contador", version, about = "Integra Contador tax-data client")]
struct AppCli {
    /// Config file path
    #[arg(short, long, default_value = "config.json", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query a taxpayer and print the consolidated report
    Query {
        /// Taxpayer CNPJ, formatted or digits only
        taxpayer: String,
        /// Comma separated endpoint names (default: all)
        #[arg(long)]
        endpoints: Option<String>,
        /// Declaration year filter for pgdasd
        #[arg(long)]
        year: Option<u16>,
        /// Write the JSON report to this file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Obtain a token and print a health record
    Token,
    /// Remove the cached token
    ClearCache,
    /// List the known endpoints
    Endpoints,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AppCli::parse();
    let (settings, source) = Settings::load_with_source(&args.config)?;
    utils::logging::init(&settings.log_level, &settings.log_format);
    match source {
        ConfigSource::File(path) => debug!(path = %path.display(), "config loaded"),
        ConfigSource::Defaults(path) => {
            info!(path = %path.display(), "config file not found, using defaults and environment")
        }
    }

    match args.command {
        Commands::Query {
            taxpayer,
            endpoints,
            year,
            output,
        } => {
            let taxpayer = TaxId::parse(&taxpayer).context("invalid taxpayer id")?;
            let endpoints = match endpoints {
                Some(list) => Endpoint::parse_list(&list)?,
                None => Endpoint::ALL.to_vec(),
            };
            let ctx = ClientContext::from_settings(settings)?;
            let report = ctx.query(&taxpayer, &endpoints, year).await;
            let json = report.to_json_pretty()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json).with_context(|| format!("writing report to {}", path))?;
                    info!(path = %path, "report written");
                }
                None => println!("{}", json),
            }
        }
        Commands::Token => {
            let ctx = ClientContext::from_settings(settings)?;
            let health = ctx.tokens().health_check().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Commands::ClearCache => {
            let cache = TokenCache::new(settings.token_cache_path.clone(), settings.token_safety_margin());
            cache.invalidate().await;
            info!(path = %cache.path().display(), "token cache cleared");
        }
        Commands::Endpoints => {
            for endpoint in Endpoint::ALL {
                println!("{:<16} {}", endpoint.name(), endpoint.path_template());
            }
        }
    }

    Ok(())
}
