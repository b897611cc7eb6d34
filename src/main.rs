use clap::Parser;
use dialect_gateway::channels::ChannelPreset;
use dialect_gateway::config::search_paths_for_display;
use dialect_gateway::tokens::preload_tokenizers;
use dialect_gateway::{build_router, AppState, GatewayConfig, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "dialect-gateway",
    about = "LLM API gateway: serve chat, structured-response and message-style callers from any channel",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Channel preset name (overrides config)
    #[arg(long)]
    channel: Option<String>,

    /// Estimate tokens from byte length instead of tokenizing
    #[arg(long)]
    approximate_tokens: bool,

    /// Log file path
    #[arg(long, default_value = "dialect-gateway.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dialect_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in search_paths_for_display().iter().enumerate() {
            println!("  {}. {}", i + 1, path);
        }
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref channel) = cli.channel {
        config.channel.name = channel.clone();
        if let Some(preset) = ChannelPreset::from_name(channel) {
            config.channel.channel_type = Some(preset.channel_type);
            config.channel.api_key_env = preset.default_api_key_env.to_string();
        }
    }
    if cli.approximate_tokens {
        config.approximate_tokens = true;
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    // Validate config eagerly
    let base_url = config.effective_base_url()?;
    let _api_key = config.resolve_api_key()?;

    if !config.approximate_tokens {
        preload_tokenizers();
    }

    info!("╔═══════════════════════════════════════════════════════╗");
    info!("║           dialect-gateway v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════════╝");
    info!("  Channel:   {} ({})", config.channel.name, config.channel_type().as_str());
    info!("  Base URL:  {}", base_url);
    info!(
        "  Format:    {}",
        config
            .channel
            .format
            .map_or("auto", |f| f.as_str())
    );
    info!("  Port:      {}", config.port);
    info!("  Models:    {} mapped", config.models.len());
    info!("  Tokens:    {}", if config.approximate_tokens { "approximate" } else { "tokenizer" });
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting dialect-gateway channel={} base_url={} port={}",
            config.channel.name, base_url, config.port
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let state = Arc::new(AppState::new(config.clone(), client, logger.clone()));

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  Chat:      POST /v1/chat/completions");
    info!("  Responses: POST /v1/responses");
    info!("  Messages:  POST /v1/messages");
    info!("  Realtime:  GET  /v1/realtime?model=...");

    axum::serve(listener, app).await?;

    Ok(())
}
