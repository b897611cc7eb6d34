//! Start a dialect-gateway server programmatically.
//!
//! Usage:
//!   export OPENAI_API_KEY=sk-your-key
//!   cargo run --example basic_gateway

use dialect_gateway::{build_router, AppState, GatewayConfig, SharedLogger};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = match GatewayConfig::find_and_load(None) {
        Ok(config) => config,
        Err(_) => GatewayConfig::for_channel("openai"),
    };
    let base_url = config.effective_base_url()?;

    println!("Channel: {} ({})", config.channel.name, base_url);
    println!("Models mapped: {}", config.models.len());

    let logger = SharedLogger::new("gateway-example.log")?;
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let port = config.port;
    let state = Arc::new(AppState::new(config, client, logger));

    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("Listening on http://{}", addr);
    println!();
    println!("  curl http://localhost:{}/v1/chat/completions \\", port);
    println!("    -d '{{\"model\":\"gpt-4.1\",\"messages\":[{{\"role\":\"user\",\"content\":\"hi\"}}]}}'");

    axum::serve(listener, app).await?;
    Ok(())
}
