use clap::Parser;
use llm_bridge::{build_router, AppState, BridgeConfig, Provider, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "llm-bridge",
    about = "LLM API compatibility proxy — translate chat traffic between OpenAI and Ollama wire formats",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend provider name (overrides config)
    #[arg(long)]
    backend: Option<String>,

    /// Log file path
    #[arg(long, default_value = "llm-bridge.log")]
    log_file: PathBuf,

    /// Print the known providers and their capabilities, then exit
    #[arg(long)]
    list_providers: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.list_providers {
        for provider in Provider::all() {
            let caps = provider.capabilities();
            println!(
                "{:<8} tools={} system={} images={} logprobs={} n={} stop={}",
                provider.name(),
                caps.tool_calling,
                caps.system_messages,
                caps.multimodal,
                caps.logprobs,
                caps.n_sampling,
                caps.stop_sequences,
            );
        }
        return Ok(());
    }

    let mut config = BridgeConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref backend) = cli.backend {
        let provider = Provider::from_name(backend)
            .ok_or_else(|| anyhow::anyhow!("Unknown backend '{backend}'. Known: openai, ollama, generic"))?;
        config.backend.provider = provider;
        config.backend.base_url = None;
        config.backend.api_key_env = None;
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    // Validate config eagerly
    let base_url = config.effective_base_url();
    let _api_key = config.resolve_api_key()?;

    info!("llm-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Backend:   {}", config.backend.provider);
    info!("  Base URL:  {}", base_url);
    info!("  Port:      {}", config.port);
    info!("  Strict:    {}", config.defaults.strict);
    info!("  Models:    {} mapped", config.models.len());
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting llm-bridge backend={} base_url={} port={}",
            config.backend.provider, base_url, config.port
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
        logger: logger.clone(),
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  Point an OpenAI client at http://localhost:{}/ollama/chat/completions", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
