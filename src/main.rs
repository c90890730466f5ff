use bridge_gateway::config::{AuthMode, BridgeConfig, Protocol};
use bridge_gateway::Bridge;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Bridge Gateway: forwards TCP, UDP or HTTP input to an HTTP upstream
#[derive(Parser)]
#[command(name = "bridge-gateway", version, about)]
struct Cli {
    /// Path to configuration file (.hcl)
    #[arg(short, long, default_value = "bridge.hcl")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file without starting the bridge
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long, default_value = "bridge.hcl")]
        config: String,
    },
    /// Print a starter configuration
    Template,
}

#[tokio::main]
async fn main() -> bridge_gateway::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Template) => {
            print!("{}", bridge_gateway::config::TEMPLATE);
            return Ok(());
        }
        Some(Commands::Validate { config: config_path }) => {
            return validate_config(config_path).await;
        }
        None => {}
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("Bridge Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = if std::path::Path::new(&cli.config).exists() {
        tracing::info!(config = cli.config, "Loading configuration");
        BridgeConfig::from_file(&cli.config).await?
    } else {
        tracing::warn!(
            config = cli.config,
            "Config file not found, using defaults (run `bridge-gateway template` for a starter file)"
        );
        BridgeConfig::default()
    };

    let bridge = Bridge::new(config)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
            }
            cancel.cancel();
        });
    }

    tracing::info!("Bridge ready, press Ctrl+C to stop");
    bridge.run(cancel).await?;

    let metrics = bridge.metrics().snapshot();
    tracing::info!(
        forwarded = metrics.forwarded,
        failed = metrics.failed,
        dropped = metrics.dropped,
        "Bridge stopped"
    );
    Ok(())
}

/// Validate a configuration file and print diagnostics
async fn validate_config(path: &str) -> bridge_gateway::Result<()> {
    if !std::path::Path::new(path).exists() {
        eprintln!("✗ Config file not found: {}", path);
        std::process::exit(1);
    }

    let config = match BridgeConfig::from_file(path).await {
        Ok(c) => {
            println!("✓ Config parsed successfully ({})", path);
            c
        }
        Err(e) => {
            eprintln!("✗ Parse error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("✗ Validation error: {}", e);
        std::process::exit(1);
    }

    println!("✓ Configuration is valid");
    println!();
    println!("  Protocol:       {}", config.protocol);
    match config.protocol {
        Protocol::Tcp => {
            if let Some(tcp) = &config.tcp {
                println!(
                    "    {}:{} → {} ({}, buffer {} bytes)",
                    tcp.address,
                    tcp.port,
                    tcp.target_url.as_deref().unwrap_or_default(),
                    tcp.content_type,
                    tcp.buffer_size
                );
            }
        }
        Protocol::Udp => {
            if let Some(udp) = &config.udp {
                println!(
                    "    {}:{} → {} ({})",
                    udp.address,
                    udp.port,
                    udp.target_url.as_deref().unwrap_or_default(),
                    udp.content_type
                );
            }
        }
        Protocol::Http => {
            if let Some(http) = &config.http {
                println!(
                    "    {} → {}",
                    http.listen_url,
                    http.target_url.as_deref().unwrap_or_default()
                );
            }
        }
    }
    println!("  Authentication: {}", config.authentication);
    if config.authentication == AuthMode::Oauth2ClientCredentials {
        if let Some(oauth2) = &config.auth.oauth2 {
            println!("    client {} @ {}", oauth2.client_id, oauth2.authority);
        }
    }
    println!(
        "  Client:         timeout {}s, pool lifetime {}s, max in flight {}",
        config.client.timeout_secs,
        config.client.pooled_connection_lifetime_secs,
        config.client.max_in_flight
    );

    Ok(())
}
