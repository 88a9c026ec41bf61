//! cmdport CLI - one-shot operations on configured command-line channels

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use std::sync::Arc;
use tabled::{Table, Tabled};

use cmdport_core::application::CommandLineChannel;
use cmdport_core::domain::PortValue;
use cmdport_core::port::time_provider::SystemTimeProvider;
use cmdport_core::port::CommandRunner;
use cmdport_infra_system::{load_config, AppConfig, ShellCommandRunner};

const DEFAULT_CONFIG_PATH: &str = "~/.cmdport/config.toml";

#[derive(Parser)]
#[command(name = "cmdport")]
#[command(about = "Command-line backed virtual ports", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, env = "CMDPORT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the ports of every channel
    Ports,

    /// Run read commands once and show the parsed values
    Read {
        /// Only this channel
        #[arg(long)]
        channel: Option<String>,
    },

    /// Write one port value (runs the write command, then re-reads)
    Write {
        /// Channel name
        channel: String,

        /// Port id
        port: String,

        /// Value: true, false, an integer or a float
        value: String,
    },
}

#[derive(Tabled)]
struct PortRow {
    channel: String,
    port: String,
    #[tabled(rename = "type")]
    port_type: String,
    writable: bool,
}

#[derive(Tabled)]
struct ValueRow {
    channel: String,
    port: String,
    value: String,
}

/// Parse a value given on the command line
fn parse_value(text: &str) -> Result<PortValue> {
    match text.trim().to_lowercase().as_str() {
        "true" => Ok(PortValue::from(true)),
        "false" => Ok(PortValue::from(false)),
        other => other
            .parse::<i64>()
            .map(PortValue::Integer)
            .or_else(|_| other.parse::<f64>().map(PortValue::Float))
            .with_context(|| format!("Invalid value '{}'", text)),
    }
}

fn display_value(value: Option<PortValue>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "unknown".to_string())
}

fn build_channel(
    config: &AppConfig,
    name: &str,
    runner: Arc<dyn CommandRunner>,
) -> Result<CommandLineChannel> {
    let channel_config = config
        .channel(name)
        .with_context(|| format!("No channel named '{}'", name))?;
    Ok(CommandLineChannel::new(channel_config, runner)?)
}

async fn value_rows(channel: &CommandLineChannel) -> Vec<ValueRow> {
    channel
        .values()
        .await
        .into_iter()
        .map(|(port, value)| ValueRow {
            channel: channel.name().to_string(),
            port,
            value: display_value(value),
        })
        .collect()
}

fn print_values(rows: Vec<ValueRow>, as_json: bool) {
    if as_json {
        let values: Vec<_> = rows
            .iter()
            .map(|r| json!({"channel": r.channel, "port": r.port, "value": r.value}))
            .collect();
        println!("{}", json!(values));
    } else {
        println!("{}", Table::new(rows));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Warnings (stderr output, non-zero exit codes) go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cmdport=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli.config).context("Failed to load configuration")?;
    let runner: Arc<dyn CommandRunner> = Arc::new(ShellCommandRunner::new(
        Arc::new(SystemTimeProvider),
        &config.runner,
    ));

    match cli.command {
        Commands::Ports => {
            let mut rows = Vec::new();
            for channel_config in &config.channels {
                let channel = CommandLineChannel::new(channel_config, runner.clone())?;
                rows.extend(channel.make_port_specs().into_iter().map(|spec| PortRow {
                    channel: channel.name().to_string(),
                    port: spec.id,
                    port_type: spec.port_type.to_string(),
                    writable: spec.writable,
                }));
            }

            if cli.json {
                let ports: Vec<_> = rows
                    .iter()
                    .map(|r| {
                        json!({
                            "channel": r.channel,
                            "id": r.port,
                            "type": r.port_type,
                            "writable": r.writable,
                        })
                    })
                    .collect();
                println!("{}", json!(ports));
            } else {
                println!("{}", Table::new(rows));
            }
        }

        Commands::Read { channel } => {
            let names: Vec<String> = match channel {
                Some(name) => vec![name],
                None => config.channels.iter().map(|c| c.name.clone()).collect(),
            };

            let mut rows = Vec::new();
            let mut failures = 0;
            for name in &names {
                let channel = build_channel(&config, name, runner.clone())?;
                if let Err(e) = channel.poll().await {
                    failures += 1;
                    eprintln!("{} {}: {}", "✗".red(), name.bold(), e);
                    continue;
                }
                rows.extend(value_rows(&channel).await);
            }

            print_values(rows, cli.json);

            if failures > 0 {
                anyhow::bail!("{} channel(s) failed to read", failures);
            }
        }

        Commands::Write {
            channel,
            port,
            value,
        } => {
            let value = parse_value(&value)?;
            let channel = build_channel(&config, &channel, runner)?;

            // Seed the cache so the write command sees every current value
            if let Err(e) = channel.poll().await {
                eprintln!("{} initial read failed: {}", "!".yellow(), e);
            }

            channel
                .write(&port, value)
                .await
                .with_context(|| format!("Failed to write {}", port))?;

            if !cli.json {
                println!(
                    "{}",
                    format!("✓ {} set to {}", port, value).green().bold()
                );
                println!();
            }
            print_values(value_rows(&channel).await, cli.json);
        }
    }

    Ok(())
}
