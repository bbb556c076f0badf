//! Agent Immune System CLI binary.
//!
//! # Commands
//!
//! - `serve` - Start the HTTP proxy
//! - `scan` - Scan content for injection and dangerous URLs
//! - `redact` - Replace secrets in content
//! - `hash` - Feed signature for a threat type and pattern

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use ais::{
    config::StoreBackend,
    security::{hash_parts, ContentScanner, SecretRedactor},
    Config, HttpForwarder, Pipeline, ProxyConfig, ProxyServer, VERSION,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ais")]
#[command(version = VERSION)]
#[command(about = "Agent Immune System - protective proxy for AI agent tool calls", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/ais/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP proxy
    Serve {
        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Use the in-memory store regardless of config
        #[arg(long)]
        memory: bool,

        /// Debug logging
        #[arg(short, long)]
        verbose: bool,

        /// Log as JSON lines
        #[arg(long)]
        json_logs: bool,
    },

    /// Scan content for injection patterns and dangerous URLs
    Scan {
        /// Content to scan (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Redact secrets from content
    Redact {
        /// Content to redact (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output as JSON with findings
        #[arg(long)]
        json: bool,
    },

    /// Print the feed signature for a threat
    Hash {
        /// Threat type, e.g. prompt_injection
        threat_type: String,

        /// Matched pattern text
        pattern: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            host,
            memory,
            verbose,
            json_logs,
        } => cmd_serve(cli.config, port, host, memory, verbose, json_logs),

        Commands::Scan { input, file, json } => cmd_scan(cli.config, input, file, json),

        Commands::Redact { input, file, json } => cmd_redact(cli.config, input, file, json),

        Commands::Hash {
            threat_type,
            pattern,
        } => {
            println!("{}", hash_parts(&threat_type, &pattern));
            Ok(())
        },
    }
}

fn init_logging(verbose: bool, json_logs: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn cmd_serve(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    host: Option<String>,
    memory: bool,
    verbose: bool,
    json_logs: bool,
) -> anyhow::Result<()> {
    init_logging(verbose, json_logs);

    let mut config = Config::load(config_path.as_deref())?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    if memory {
        config.store.backend = StoreBackend::Memory;
    }

    let catalog = Arc::new(config.build_catalog()?);
    tracing::info!(
        injection = catalog.rules(ais::security::RuleDomain::Injection).len(),
        secret = catalog.rules(ais::security::RuleDomain::Secret).len(),
        dangerous_url = catalog.rules(ais::security::RuleDomain::DangerousUrl).len(),
        "pattern catalog loaded"
    );
    if config.store.backend == StoreBackend::Memory {
        tracing::warn!("Using in-memory store; agents and events are lost on exit");
    }

    let pipeline = Pipeline::new(
        config.build_store()?,
        catalog,
        Arc::new(
            HttpForwarder::new(config.forward.timeout())?
                .with_max_response_bytes(config.forward.max_response_bytes),
        ),
        config.limits,
    );
    let server = ProxyServer::new(ProxyConfig::from_config(&config)?, pipeline);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        server.run().await?;
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_scan(
    config_path: Option<PathBuf>,
    input: Option<String>,
    file: Option<PathBuf>,
    json_output: bool,
) -> anyhow::Result<()> {
    let content = read_input(input, file)?;
    let catalog = Arc::new(Config::load(config_path.as_deref())?.build_catalog()?);
    let result = ContentScanner::new(catalog).scan(&content);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.safe {
        println!("SAFE");
    } else {
        println!("UNSAFE");
        println!();
        println!("Detected threats:");
        for threat in &result.threats {
            println!("  - {} ({})", threat.threat_type, threat.severity);
            println!("    {}", threat.description);
            println!("    matched: {}", threat.pattern);
        }
    }

    if !result.safe {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_redact(
    config_path: Option<PathBuf>,
    input: Option<String>,
    file: Option<PathBuf>,
    json_output: bool,
) -> anyhow::Result<()> {
    let content = read_input(input, file)?;
    let catalog = Arc::new(Config::load(config_path.as_deref())?.build_catalog()?);
    let result = SecretRedactor::new(catalog).redact(&content);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.redacted);
        for finding in &result.findings {
            eprintln!("redacted {} ({})", finding.description, finding.pattern);
        }
    }

    Ok(())
}

fn read_input(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(path) = file {
        Ok(std::fs::read_to_string(path)?)
    } else if let Some(s) = input.filter(|s| s != "-") {
        Ok(s)
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    }
}
