use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use dhcpflow::plugins::register_builtin;
use dhcpflow::{Config, Error, PluginRegistry, Result, Server};

#[derive(Parser)]
#[command(name = "dhcpflow")]
#[command(author, version, about = "A plugin-chain DHCPv4/DHCPv6 server", long_about = None)]
struct Cli {
    /// Configuration file, named <server-name>.config.yml
    #[arg(short, long)]
    conf: Option<PathBuf>,

    /// Append logs to this file
    #[arg(short, long)]
    logfile: Option<PathBuf>,

    /// Disable logging to stdout
    #[arg(short = 'N', long)]
    nostdout: bool,

    /// Log level: none, debug, info, warning, error, fatal
    #[arg(short = 'L', long, default_value = "info")]
    loglevel: String,

    /// List known plugin names and exit
    #[arg(short = 'P', long)]
    plugins: bool,
}

fn level_directive(level: &str) -> Result<&'static str> {
    match level {
        "none" => Ok("off"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warning" => Ok("warn"),
        "error" => Ok("error"),
        "fatal" => Ok("error"),
        other => Err(Error::InvalidConfig(format!(
            "unknown log level '{}', want one of none, debug, info, warning, error, fatal",
            other
        ))),
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::new(level_directive(&cli.loglevel)?);

    let stdout_layer = if cli.nostdout {
        None
    } else {
        Some(tracing_subscriber::fmt::layer())
    };

    let file_layer = match &cli.logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut registry = PluginRegistry::new();
    register_builtin(&mut registry)?;

    if cli.plugins {
        for name in registry.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    init_logging(&cli)?;

    let conf = cli
        .conf
        .as_ref()
        .ok_or_else(|| Error::InvalidConfig("missing --conf <path>".to_string()))?;
    let config = Config::load(conf).await?;
    info!(server = %config.name, "loaded configuration from {}", conf.display());

    let server = Server::start(&config, &registry).await?;
    server.wait().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("dhcpflow: {}", error);
            ExitCode::FAILURE
        }
    }
}
