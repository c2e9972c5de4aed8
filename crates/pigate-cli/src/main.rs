#![deny(unsafe_code)]

//! pigate CLI — run the gateway, check its files, call tools locally.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use pigate_config::{AppConfig, PolicyDocument, TargetRegistry};
use pigate_core::auth::Authenticator;
use pigate_core::build_info;
use pigate_core::tools::list_tools;
use pigate_core::{CallMeta, Gateway, ToolCall, logging};

/// pigate — policy-gated remote execution over SSH.
#[derive(Parser)]
#[command(name = "pigate", version, long_version = build_info::LONG_VERSION, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "pigate.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway and serve until interrupted.
    Serve,

    /// Validate the config, target registry and policy.
    Check {
        /// Print the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// List the tools the current policy exposes.
    Tools {
        /// Only tools allowed on this target.
        #[arg(long)]
        target: Option<String>,
    },

    /// Run one tool call through the full gateway pipeline.
    Call {
        /// Tool name, e.g. `ssh_exec`.
        tool: String,

        /// Tool arguments as a JSON object.
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Bearer credential: an API key or a signed token.
        #[arg(long)]
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    logging::init(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Serve => cmd_serve(config).await?,
        Commands::Check { show } => cmd_check(&cli.config, &config, show).await?,
        Commands::Tools { target } => cmd_tools(&config, target.as_deref()).await?,
        Commands::Call { tool, args, token } => cmd_call(config, tool, &args, &token).await?,
    }

    Ok(())
}

async fn cmd_serve(config: AppConfig) -> Result<()> {
    info!(version = build_info::LONG_VERSION, "Starting pigate gateway");
    let gateway = Gateway::load(config).await?;
    gateway.run().await?;
    Ok(())
}

async fn cmd_check(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    let registry = TargetRegistry::load(&config.paths.hosts)
        .await
        .with_context(|| format!("target registry {}", config.paths.hosts.display()))?;
    let policy = PolicyDocument::load_or_default(&config.paths.policy)
        .await
        .with_context(|| format!("policy {}", config.paths.policy.display()))?;
    Authenticator::from_config(&config.security).await?;

    for target in policy.per_target_tools.keys().chain(policy.gpio.keys()) {
        if registry.get(target).is_none() {
            println!("warning: policy mentions unknown target '{target}'");
        }
    }
    if !config.has_credentials() {
        println!("warning: no API keys or token key configured");
    }

    if show {
        let toml_str = toml::to_string_pretty(config).context("cannot render config")?;
        println!("{toml_str}");
    }
    println!(
        "Configuration at '{}' is valid: {} target(s), {} tool(s) enabled.",
        config_path.display(),
        registry.len(),
        list_tools(&policy, None).len()
    );
    Ok(())
}

async fn cmd_tools(config: &AppConfig, target: Option<&str>) -> Result<()> {
    let policy = PolicyDocument::load_or_default(&config.paths.policy).await?;
    for tool in list_tools(&policy, target) {
        println!("{:<16} {}", tool.name, tool.description);
    }
    Ok(())
}

async fn cmd_call(config: AppConfig, tool: String, args: &str, token: &str) -> Result<()> {
    let arguments = parse_arguments(args)?;
    let gateway = Gateway::load(config).await?;
    let authorization = format!("Bearer {token}");
    let meta = CallMeta {
        authorization: Some(&authorization),
        source: IpAddr::V4(Ipv4Addr::LOCALHOST),
    };

    let result = gateway
        .dispatcher()
        .invoke(meta, ToolCall::new(tool, arguments))
        .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn parse_arguments(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(value)
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("cannot load {}", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}
