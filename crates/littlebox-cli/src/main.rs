//! littlebox command line entry point.
//!
//! ```text
//! littlebox info                       runtime information
//! littlebox stat <name>                one container
//! littlebox up <name> [--image ...]    make sure a container is running
//! littlebox down <name>                stop a container
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::CliConfig;
use littlebox_acl::{AccessControl, Action, ResourceKind, Role};
use littlebox_core::{ContainerHandle, ContainerSpec, RuntimeGateway, Stat};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "littlebox", version, about = "Lazily managed LXD containers")]
struct Cli {
    /// Role the command runs as.
    #[arg(long, global = true, default_value = "admin")]
    role: Role,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show runtime information.
    Info,

    /// Show one container.
    Stat { name: String },

    /// Make sure a container exists and is running.
    Up {
        name: String,

        /// Image alias to create from.
        #[arg(long, conflicts_with = "image_json")]
        image: Option<String>,

        /// Full image source object, passed to the daemon verbatim.
        #[arg(long, value_name = "JSON")]
        image_json: Option<String>,

        /// Profile applied on creation.
        #[arg(long)]
        profile: Option<String>,

        /// Create an ephemeral container.
        #[arg(long)]
        ephemeral: bool,

        /// Fail instead of creating a missing container.
        #[arg(long)]
        no_create: bool,

        /// Container config entry, repeatable.
        #[arg(long = "config", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        config: Vec<(String, String)>,

        /// Give up after this many seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Stop a running container.
    Down { name: String },
}

impl Command {
    /// Grants the command needs.
    fn required(&self) -> Vec<(Action, ResourceKind)> {
        match self {
            Command::Info => vec![(Action::Read, ResourceKind::Runtime)],
            Command::Stat { .. } => vec![(Action::Read, ResourceKind::Container)],
            Command::Up { no_create, .. } => {
                let mut required = vec![
                    (Action::Read, ResourceKind::Container),
                    (Action::Start, ResourceKind::Container),
                ];
                if !no_create {
                    required.push((Action::Create, ResourceKind::Container));
                }
                required
            }
            Command::Down { .. } => vec![(Action::Stop, ResourceKind::Container)],
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

fn authorize(acl: &AccessControl, role: Role, command: &Command) -> anyhow::Result<()> {
    for (action, resource) in command.required() {
        acl.check(role, action, resource)?;
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, stdout carries results
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("littlebox=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = CliConfig::from_env();
    tracing::debug!(?config, "Configuration loaded");
    config.validate_warn();

    let acl = config.access_control()?;
    authorize(&acl, cli.role, &cli.command)?;

    let gateway = RuntimeGateway::connect(config.lxd_config()?)?;

    match cli.command {
        Command::Info => {
            gateway.ready().await.context("runtime unavailable")?;
            if let Stat::Runtime(info) = gateway.stat(None).await? {
                print_json(&info)?;
            }
        }
        Command::Stat { name } => {
            gateway.ready().await.context("runtime unavailable")?;
            let container = gateway.container(&name).await?;
            print_json(container.descriptor())?;
        }
        Command::Up {
            name,
            image,
            image_json,
            profile,
            ephemeral,
            no_create,
            config,
            timeout,
        } => {
            let mut builder = ContainerSpec::builder()
                .ephemeral(ephemeral)
                .create_if_not_exists(!no_create);
            if let Some(alias) = image {
                builder = builder.image(alias);
            }
            if let Some(json) = image_json {
                let source: serde_json::Map<String, serde_json::Value> =
                    serde_json::from_str(&json).context("--image-json must be a JSON object")?;
                builder = builder.image(source);
            }
            if let Some(profile) = profile {
                builder = builder.profile(profile);
            }
            for (key, value) in config {
                builder = builder.config_entry(key, value);
            }

            let handle = ContainerHandle::new(gateway, name, builder.build()?)?;

            // The bring-up keeps running in the background if we stop waiting.
            let bring_up = async {
                match timeout {
                    Some(secs) => tokio::time::timeout(Duration::from_secs(secs), handle.open())
                        .await
                        .context("timed out waiting for the container")??,
                    None => handle.open().await?,
                }
                anyhow::Ok(())
            };
            tokio::select! {
                result = bring_up => result?,
                _ = tokio::signal::ctrl_c() => {
                    anyhow::bail!("interrupted before {} came up", handle.name());
                }
            }

            if let Some(outcome) = handle.bring_up() {
                tracing::info!(container = %handle.name(), %outcome, "Container up");
            }
            let container = handle.stat().await?;
            print_json(container.descriptor())?;
            handle.close().await?;
        }
        Command::Down { name } => {
            gateway.ready().await.context("runtime unavailable")?;
            let container = gateway.container(&name).await?;
            if container.is_running() {
                container.stop().await?;
                tracing::info!(container = %name, "Container stopped");
            } else {
                tracing::info!(container = %name, status = %container.status(), "Container not running");
            }
            let container = gateway.container(&name).await?;
            print_json(container.descriptor())?;
        }
    }

    Ok(())
}
