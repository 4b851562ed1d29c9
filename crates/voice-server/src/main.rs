//! Binary entry point: wires the document store, telephony provider
//! client, orchestrator, scheduler, retry engine, webhook dispatcher and
//! per-call session engine into one process and serves the HTTP surface
//! (§6) and media socket on a single listener.

mod connectors;
mod dispatch;
mod media_ws;
mod metrics_route;
mod shutdown;
mod webhook_route;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use voice_api::{ApiConfig, ApiServer, AppState};
use voice_orchestrator::{Orchestrator, OrchestratorConfig};
use voice_persistence::{MemoryStore, MongoStore, Store, TranscriptBuffer, TranscriptBufferConfig};
use voice_provider::{CircuitBreakerConfig, ProviderClient, ProviderClientConfig, RateLimiterConfig};
use voice_retry::{RetryConfig, RetryEngine};
use voice_scheduler::{JobDispatchHandler, Scheduler};
use voice_session::SessionConfig;
use voice_types::{Agent, PlatformConfig};

use connectors::{EchoSttConnector, NullKnowledgeBase, ReferenceLlmClient, SilentTtsSynthesizer};
use dispatch::VoiceJobDispatcher;
use shutdown::shutdown_signal_with_drain;
use webhook_route::WebhookState;

#[derive(Debug, Parser)]
#[command(name = "voice-server", about = "Outbound voice calling platform server")]
struct Cli {
    /// Path to a TOML config file overlaying the struct defaults (§6 "Environment").
    #[arg(long, env = "VOICE_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[arg(long, env = "VOICE_BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: SocketAddr,

    /// When set, uses MongoDB instead of the in-memory store.
    #[arg(long, env = "VOICE_MONGO_URI")]
    mongo_uri: Option<String>,

    #[arg(long, env = "VOICE_MONGO_DB", default_value = "voice_platform")]
    mongo_db: String,

    /// JSON array of [`Agent`] records to seed at startup. Agent CRUD
    /// itself is out of scope (§1 Non-goals); this is bootstrap only.
    #[arg(long, env = "VOICE_AGENTS_SEED_FILE")]
    agents_seed_file: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("voice_server=info,tower_http=info"));
    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set tracing subscriber: {err}");
    }
}

fn load_agents(path: &PathBuf) -> Result<Vec<Agent>, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let config = match PlatformConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(err) => {
            error!(%err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let agents = match &cli.agents_seed_file {
        Some(path) => match load_agents(path) {
            Ok(agents) => agents,
            Err(err) => {
                error!(%err, "failed to load agents seed file");
                return ExitCode::FAILURE;
            }
        },
        None => Vec::new(),
    };

    let provider = Arc::new(ProviderClient::new(ProviderClientConfig {
        base_url: config.provider.base_url.clone(),
        basic_auth_user: config.provider.api_key_id.clone(),
        basic_auth_pass: config.provider.api_key_secret.clone(),
        request_timeout: Duration::from_secs(10),
        rate_limiter: RateLimiterConfig::default(),
        circuit_breaker: CircuitBreakerConfig::default(),
    }));

    let result = if let Some(uri) = &cli.mongo_uri {
        match MongoStore::connect(uri, &cli.mongo_db).await {
            Ok(store) => {
                if let Err(err) = store.ensure_indexes().await {
                    error!(%err, "failed to create MongoDB indexes");
                    return ExitCode::FAILURE;
                }
                for agent in agents {
                    if let Err(err) = store.seed_agent(agent).await {
                        error!(%err, "failed to seed agent");
                        return ExitCode::FAILURE;
                    }
                }
                info!(db = %cli.mongo_db, "using MongoDB store");
                run(Arc::new(store), provider, config, cli.bind_addr).await
            }
            Err(err) => {
                error!(%err, "failed to connect to MongoDB");
                return ExitCode::FAILURE;
            }
        }
    } else {
        let store = MemoryStore::new();
        for agent in agents {
            store.seed_agent(agent);
        }
        info!("using in-memory store (data will not persist across restarts)");
        run(Arc::new(store), provider, config, cli.bind_addr).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "server error");
            ExitCode::FAILURE
        }
    }
}

async fn run<S: Store + 'static>(
    store: Arc<S>,
    provider: Arc<ProviderClient>,
    config: PlatformConfig,
    bind_addr: SocketAddr,
) -> std::io::Result<()> {
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        provider.clone(),
        OrchestratorConfig {
            max_concurrent_outbound: config.max_concurrent_outbound,
            virtual_number: config.provider.virtual_number.clone(),
            app_id: config.provider.app_id.clone(),
            bulk_min_inter_initiation_gap: Duration::from_millis(config.bulk_min_inter_initiation_gap_ms),
        },
    ));
    let scheduler = Arc::new(Scheduler::new(store.clone()));
    let retry = Arc::new(RetryEngine::new(
        store.clone(),
        scheduler.clone(),
        RetryConfig {
            off_peak: config.off_peak.clone(),
            auto_retry_for_retries: config.auto_retry_for_retries,
            voicemail_retryable: false,
        },
    ));

    let stt_pool = voice_pool::SttPool::new(
        EchoSttConnector,
        voice_pool::SttPoolConfig {
            capacity: config.stt_pool_size,
            queue_timeout: config.stt_queue_timeout(),
            max_queue_len: config.stt_max_queue_len,
        },
    );
    let tts_queue = voice_pool::TtsQueue::new(config.tts_provider_caps.clone());
    let tts: Arc<dyn voice_session::TtsSynthesizer> = Arc::new(SilentTtsSynthesizer);
    let llm: Arc<dyn voice_session::LlmClient> = Arc::new(ReferenceLlmClient::default());
    let kb: Option<Arc<dyn voice_session::KnowledgeBase>> = Some(Arc::new(NullKnowledgeBase));

    let transcript_buffer = Arc::new(TranscriptBuffer::new(
        store.clone(),
        TranscriptBufferConfig {
            batch_size: config.transcript_batch_size as usize,
            batch_interval: Duration::from_secs(config.transcript_batch_interval_secs),
        },
    ));
    let _flush_loop = transcript_buffer.clone().spawn_flush_loop();

    if let Err(err) = scheduler.reload_pending().await {
        error!(%err, "failed to reload pending scheduled jobs");
    }
    let job_handler: Arc<dyn JobDispatchHandler> =
        Arc::new(VoiceJobDispatcher::new(store.clone(), orchestrator.clone(), retry.clone()));
    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(job_handler).await })
    };

    let app_state = AppState::new(store.clone(), orchestrator.clone(), scheduler.clone(), retry.clone());
    let api_server = ApiServer::new(app_state, ApiConfig::default().with_addr(bind_addr));
    let router = api_server.router();

    let webhook_dispatcher = Arc::new(voice_webhook::WebhookDispatcher::new(
        store.clone(),
        orchestrator.clone(),
        retry.clone(),
        config.auto_retry,
    ));
    let router = router.merge(
        webhook_route::routes()
            .with_state(WebhookState {
                dispatcher: webhook_dispatcher,
            }),
    );

    let session_config = SessionConfig {
        speculation_word_threshold: config.speculation_word_threshold,
        silence_backstop: config.silence_backstop(),
        max_call_duration: config.max_call_duration(),
        max_idle: config.max_idle(),
        tts_provider: "provider-a".to_string(),
        tts_fallback_provider: None,
        silence_check_interval: Duration::from_millis(200),
    };
    let media_state = media_ws::MediaState {
        store: store.clone(),
        orchestrator: orchestrator.clone(),
        transcript_buffer: transcript_buffer.clone(),
        stt_pool: stt_pool.clone(),
        tts_queue,
        tts,
        llm,
        kb,
        session_config,
    };
    let router = router.merge(media_ws::routes().with_state(media_state));

    let metrics_state = metrics_route::install(stt_pool)
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    let router = router.merge(metrics_route::routes().with_state(metrics_state));

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "voice-server listening");

    let drain_window = Duration::from_secs(config.drain_window_secs);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal_with_drain(drain_window))
        .await?;

    transcript_buffer.flush_all().await;
    scheduler_task.abort();
    info!("voice-server shut down");
    Ok(())
}
