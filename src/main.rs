use claude_relay::config::config_search_paths;
use claude_relay::providers::ProviderPreset;
use claude_relay::tokens::TiktokenCounter;
use claude_relay::{build_router, AppState, Gateway, HttpUpstream, RelayConfig, SharedJournal};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-relay",
    about = "Serve Anthropic Messages clients from DeepSeek, Gemini and other OpenAI-compatible providers",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Model serving "sonnet" requests (overrides config)
    #[arg(long, env = "BIG_MODEL")]
    big_model: Option<String>,

    /// Model serving "haiku" requests (overrides config)
    #[arg(long, env = "SMALL_MODEL")]
    small_model: Option<String>,

    /// Always add the chain-of-thought system prompt for sonnet requests
    #[arg(long)]
    always_cot: bool,

    /// Request journal path (JSONL)
    #[arg(long, default_value = "claude-relay.log")]
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
                .unwrap_or_else(|_| "claude_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = RelayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(big) = cli.big_model {
        config.big_model = big;
    }
    if let Some(small) = cli.small_model {
        config.small_model = small;
    }
    if cli.always_cot {
        config.always_cot = true;
    }

    let journal = SharedJournal::open(&cli.log_file)?;

    info!("claude-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("  Big model:    {} (sonnet)", config.big_model);
    info!("  Small model:  {} (haiku)", config.small_model);
    info!("  Aliases:      {} mapped", config.models.len());
    info!("  Port:         {}", config.port);
    info!("  Journal:      {}", cli.log_file.display());
    if config.always_cot {
        warn!("Chain-of-thought prompt will be added to every sonnet request");
    }
    if !config.soft_translation_errors {
        info!("  Translation failures are returned as HTTP errors");
    }
    for preset in ProviderPreset::all() {
        if config.api_key_for(preset).is_ok() {
            info!("  Provider:     {} ({})", preset.name, config.base_url_for(preset));
        }
    }
    for name in config.providers.keys() {
        if ProviderPreset::from_name(name).is_none() {
            warn!("Ignoring [providers.{}]: not a known provider", name);
        }
    }

    journal.info(
        "startup",
        format!(
            "Starting claude-relay big_model={} small_model={} port={}",
            config.big_model, config.small_model, config.port
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let config = Arc::new(config);
    let upstream = Arc::new(HttpUpstream::new(client, config.clone()));
    let counter = Arc::new(TiktokenCounter::new()?);

    let state = Arc::new(AppState {
        gateway: Gateway::new(&config, upstream, counter),
        journal,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://localhost:{} claude", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
