//! deskpilot server entry point.

use tracing_subscriber::EnvFilter;

use deskpilot::{api, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("deskpilot=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        bind = %config.bind_addr(),
        model = %config.llm.model,
        max_steps = config.max_steps,
        "Starting deskpilot"
    );

    api::serve(config).await
}
