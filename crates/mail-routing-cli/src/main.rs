use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mail_routing_api::{load_mail, ExplainRequest, MailRoutingApi, API_CONTRACT_VERSION};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "mrr")]
#[command(about = "Explain recorded mail delivery and routing decisions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Whether and why the message reached the viewer.
    Delivery(ExplainArgs),
    /// The effective routing rule and every matching candidate, weakest first.
    Routing(ExplainArgs),
    /// Full inspection view: message, headers, delivery, routing, metadata.
    Inspect(ExplainArgs),
    /// Static status, reason, and rule tables.
    Registry,
}

#[derive(Debug, Args)]
struct ExplainArgs {
    #[arg(long)]
    mail: PathBuf,
    #[arg(long)]
    viewer: String,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            object.insert(
                "api_contract_version".to_string(),
                Value::String(API_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "api_contract_version": API_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let api = MailRoutingApi::new();
    match cli.command {
        Command::Delivery(args) => {
            let report = api.explain_delivery(&explain_request(args)?)?;
            emit_json(serde_json::to_value(&report).context("failed to serialize delivery report")?)
        }
        Command::Routing(args) => {
            let report = api.explain_routing(&explain_request(args)?)?;
            emit_json(serde_json::to_value(&report).context("failed to serialize routing report")?)
        }
        Command::Inspect(args) => {
            let report = api.inspect(&explain_request(args)?)?;
            emit_json(serde_json::to_value(&report).context("failed to serialize inspection")?)
        }
        Command::Registry => emit_json(
            serde_json::to_value(api.registry()).context("failed to serialize registry")?,
        ),
    }
}

fn explain_request(args: ExplainArgs) -> Result<ExplainRequest> {
    let mail = load_mail(&args.mail)?;
    Ok(ExplainRequest { mail, viewer: args.viewer })
}
