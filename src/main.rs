//! sslocal-rust - CLI entry point

// Use mimalloc as global allocator for better p99 latency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use sslocal_rust::{Client, Config, VERSION};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sslocal-rust")]
#[command(version = VERSION)]
#[command(about = "Shadowsocks SOCKS5 local client")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Shadowsocks server host (overrides config)
    #[arg(short = 's', long = "server")]
    server: Option<String>,

    /// Shadowsocks server port (overrides config)
    #[arg(short = 'p', long = "server-port")]
    server_port: Option<u16>,

    /// Password (overrides config)
    #[arg(short = 'k', long = "password")]
    password: Option<String>,

    /// Cipher method (overrides config)
    #[arg(short = 'm', long = "method")]
    method: Option<String>,

    /// Local SOCKS5 port (overrides config)
    #[arg(short = 'l', long = "local-port")]
    local_port: Option<u16>,

    /// Connect/idle timeout in seconds (overrides config)
    #[arg(long = "timeout")]
    timeout: Option<u64>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .enable_all()
        .thread_name("sslocal-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration file if given, then apply CLI overrides
    let mut config = match &args.config {
        Some(path) => match Config::load(path.to_string_lossy().as_ref()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Some(server) = args.server {
        config.server = server;
    }
    if let Some(port) = args.server_port {
        config.server_port = port;
    }
    if let Some(password) = args.password {
        config.password = password;
    }
    if let Some(method) = args.method {
        config.method = method;
    }
    if let Some(port) = args.local_port {
        config.local_port = port;
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }

    // Initialize logging
    let level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("sslocal_rust={}", level).parse()?),
        )
        .init();

    info!("sslocal-rust v{}", VERSION);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // Test mode
    if args.test {
        info!("Configuration test passed");
        return Ok(());
    }

    let client = match Client::new(config).await {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to start client: {}", e);
            std::process::exit(1);
        }
    };

    tokio::select! {
        res = client.run() => {
            if let Err(e) = res {
                error!("Listener error: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            client.shutdown().await?;
        }
    }

    Ok(())
}
