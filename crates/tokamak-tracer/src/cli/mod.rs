//! CLI entry point for the tokamak-tracer binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use ethereum_types::H256;
use tracing::{Level, info};

use crate::client::EthClient;
use crate::config::{TracerConfig, load_config};
use crate::error::{ConfigError, TracerError};
use crate::proxy::{ProxyOptions, ProxyState, Tracer, start_proxy};
use crate::replay::Replayer;
use crate::stacktrace::ArtifactContracts;

/// Ethereum JSON-RPC proxy that attaches source-level stack traces to failed
/// transactions.
#[derive(Parser)]
#[command(name = "tokamak-tracer", about = "Tracing JSON-RPC proxy for Ethereum nodes")]
pub struct Args {
    /// TOML config file. Flags override its values.
    #[arg(long, value_name = "PATH", env = "TOKAMAK_TRACER_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        env = "TOKAMAK_TRACER_LOG_LEVEL",
        long_help = "Possible values: info, debug, trace, warn, error"
    )]
    pub log_level: Level,

    /// Node URL (`http`, `https`, `ipc` or `tcp`), replacing the `[target]` section.
    #[arg(long, value_name = "URL", env = "TOKAMAK_TRACER_TARGET")]
    pub target: Option<String>,

    /// Accept replays whose gas differs from the receipt.
    #[arg(long, action = ArgAction::SetTrue)]
    pub force: bool,

    /// Trace without replaying the transaction first.
    #[arg(long = "no-replay", action = ArgAction::SetTrue)]
    pub no_replay: bool,

    /// Project root holding the contract build artifacts.
    #[arg(long, value_name = "PATH")]
    pub project_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the tracing proxy
    #[command(name = "proxy")]
    Proxy {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Replay a mined transaction and print the state it touched as JSON
    #[command(name = "replay")]
    Replay {
        #[arg(value_parser = parse_hash)]
        hash: H256,
    },
    /// Print the stack trace of a failed transaction
    #[command(name = "trace")]
    Trace {
        #[arg(value_parser = parse_hash)]
        hash: H256,
    },
}

fn parse_hash(value: &str) -> Result<H256, String> {
    value
        .parse()
        .map_err(|e| format!("invalid transaction hash {value}: {e:?}"))
}

impl Args {
    /// Fold the flags into `config`.
    pub fn apply(&self, config: &mut TracerConfig) -> Result<(), ConfigError> {
        if let Some(target) = &self.target {
            let url = url::Url::parse(target)
                .map_err(|e| ConfigError::Invalid(format!("target {target}: {e}")))?;
            config.target.schema = url.scheme().to_string();
            config.target.host = match url.scheme() {
                "ipc" => format!("{}{}", url.host_str().unwrap_or_default(), url.path()),
                _ => url.host_str().unwrap_or_default().to_string(),
            };
            if let Some(port) = url.port_or_known_default() {
                config.target.port = port;
            }
        }
        if self.force {
            config.proxy.force = true;
        }
        if self.no_replay {
            config.proxy.replay = false;
        }
        if let Some(path) = &self.project_path {
            config.proxy.project_path = path.clone();
        }
        if let Command::Proxy { host, port } = &self.command {
            if let Some(host) = host {
                config.proxy.host = host.clone();
            }
            if let Some(port) = port {
                config.proxy.port = *port;
            }
        }
        config.validate()
    }
}

async fn build_tracer(config: &TracerConfig, client: EthClient) -> Result<Tracer, TracerError> {
    let contracts = ArtifactContracts::load(&config.proxy.artifacts_dir(), client.clone()).await?;
    let replayer = Replayer::new(client, config.chain.clone());
    Ok(Tracer::new(
        replayer,
        Arc::new(contracts),
        config.proxy.replay,
        config.proxy.force,
    ))
}

/// Run the tracer CLI.
pub async fn run(args: Args) -> Result<(), TracerError> {
    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config)?;

    let client = EthClient::dial(&config.target_url(), config.rpc_config()).await?;

    match args.command {
        Command::Proxy { .. } => {
            let addr: SocketAddr = format!("{}:{}", config.proxy.host, config.proxy.port)
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("proxy address: {e}")))?;
            info!(node = %config.target_url(), "redirecting to node");
            let tracer = build_tracer(&config, client).await?;
            start_proxy(addr, ProxyState::new(tracer, ProxyOptions::from(&config.proxy))).await
        }
        Command::Replay { hash } => {
            let replayer = Replayer::new(client, config.chain.clone());
            let state = replayer.process_transaction(hash, config.proxy.force).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Command::Trace { hash } => {
            let tracer = build_tracer(&config, client).await?;
            match tracer.trace(hash).await? {
                Some(text) => println!("{text}"),
                None => println!("No stack trace for {hash:#x}"),
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "tokamak-tracer",
            "--target",
            "tcp://10.0.0.1:8546",
            "--force",
            "--no-replay",
            "proxy",
            "--port",
            "7545",
        ]);
        let mut config = TracerConfig::default();
        args.apply(&mut config).unwrap();

        assert_eq!(config.target_url(), "tcp://10.0.0.1:8546");
        assert!(config.proxy.force);
        assert!(!config.proxy.replay);
        assert_eq!(config.proxy.port, 7545);
    }

    #[test]
    fn ipc_target_keeps_path() {
        let args = Args::parse_from(["tokamak-tracer", "--target", "ipc:///tmp/geth.ipc", "proxy"]);
        let mut config = TracerConfig::default();
        args.apply(&mut config).unwrap();
        assert_eq!(config.target_url(), "ipc:///tmp/geth.ipc");
    }

    #[test]
    fn hash_argument_is_parsed() {
        let hash = format!("0x{}", "11".repeat(32));
        let args = Args::parse_from(["tokamak-tracer", "trace", hash.as_str()]);
        assert!(matches!(args.command, Command::Trace { hash } if hash == H256::repeat_byte(0x11)));

        assert!(Args::try_parse_from(["tokamak-tracer", "replay", "0x12"]).is_err());
    }
}
