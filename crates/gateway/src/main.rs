use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use pandora_domain::config::{Config, ConfigSeverity, CorsConfig};
use pandora_gateway::api;
use pandora_gateway::cli::{admin_cancel, load_config, AdminCommand, Cli, Command, EXIT_STORE_UNAVAILABLE};
use pandora_gateway::state::{build_state, AppState};
use pandora_providers::{LlmClient, OpenAiCompatClient};
use pandora_tools::web::{HttpFetcher, HttpSearchProvider, PageFetcher, SearchProvider, UnconfiguredSearch};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, config_path) = match load_config(cli.config.as_ref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("pandora: {e}");
            return ExitCode::from(2);
        }
    };

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            tracing::info!(config = %config_path.display(), "configuration loaded");
            match run_server(Arc::new(config)).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(ServeError::Store(e)) => {
                    eprintln!("pandora: backing store unavailable: {e}");
                    ExitCode::from(EXIT_STORE_UNAVAILABLE)
                }
                Err(ServeError::Other(e)) => {
                    eprintln!("pandora: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Some(Command::Migrate) => match migrate(&config) {
            Ok(()) => {
                println!("stores initialized under {}", config.store.root.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("pandora: backing store unavailable: {e}");
                ExitCode::from(EXIT_STORE_UNAVAILABLE)
            }
        },
        Some(Command::Admin { command }) => match command {
            AdminCommand::Cancel { id } => match admin_cancel(&config, &id).await {
                Ok(true) => {
                    println!("cancelled {id}");
                    ExitCode::SUCCESS
                }
                Ok(false) => {
                    eprintln!("pandora: nothing to cancel for {id}");
                    ExitCode::FAILURE
                }
                Err(e) => {
                    eprintln!("pandora: {e}");
                    ExitCode::FAILURE
                }
            },
        },
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pandora_gateway=debug")),
        )
        .json()
        .init();
}

/// `migrate` — create the on-disk layout so `serve` starts clean.
fn migrate(config: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.store.root)?;
    // Probe writability; the allocator needs it on first turn.
    let probe = config.store.root.join(".migrate_probe");
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)?;
    Ok(())
}

enum ServeError {
    Store(anyhow::Error),
    Other(anyhow::Error),
}

async fn run_server(config: Arc<Config>) -> Result<(), ServeError> {
    tracing::info!("Pandora starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        return Err(ServeError::Other(anyhow::anyhow!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        )));
    }

    // ── Collaborators ────────────────────────────────────────────────
    let llm_client: Arc<dyn LlmClient> = Arc::new(
        OpenAiCompatClient::from_config(&config.llm)
            .map_err(|e| ServeError::Other(e.into()))?,
    );
    let fetch_timeout = Duration::from_secs(config.research.fetch_timeout_seconds);
    let search: Arc<dyn SearchProvider> = match &config.research.search_endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint, "search provider ready");
            Arc::new(
                HttpSearchProvider::new(endpoint.clone(), fetch_timeout)
                    .map_err(|e| ServeError::Other(e.into()))?,
            )
        }
        None => {
            tracing::warn!("no search endpoint configured; research turns will report it");
            Arc::new(UnconfiguredSearch)
        }
    };
    let fetcher: Arc<dyn PageFetcher> = Arc::new(
        HttpFetcher::new(fetch_timeout).map_err(|e| ServeError::Other(e.into()))?,
    );

    // ── State (Policy → TurnStore → TraceHub → JobRegistry →
    //    InterventionBroker → ToolRouter → Scheduler deps) ────────────
    let state = build_state(config.clone(), llm_client, search, fetcher)
        .map_err(|e| ServeError::Store(e.into()))?;
    tracing::info!(
        tools = state.tools.registry().len(),
        max_concurrent_turns = config.limits.max_concurrent_turns,
        llm_concurrency = config.limits.llm_concurrency,
        "runtime ready"
    );

    spawn_sweepers(&state);

    // ── CORS / rate limit / concurrency layers ───────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);
    let max_concurrent = std::env::var("PANDORA_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);

    let governor_layer = config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");
        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );
        GovernorLayer {
            config: Arc::new(gov_config),
        }
    });

    let router = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = if let Some(governor) = governor_layer {
        router.layer(governor).with_state(state.clone())
    } else {
        router.with_state(state.clone())
    };

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServeError::Other(anyhow::anyhow!("binding to {addr}: {e}")))?;
    tracing::info!(addr = %addr, "Pandora listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .map_err(|e| ServeError::Other(anyhow::anyhow!("server error: {e}")))?;

    tracing::info!("Pandora stopped");
    Ok(())
}

/// Periodic maintenance: trace TTL, job GC, intervention expiry.
fn spawn_sweepers(state: &AppState) {
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let removed = state.hub.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "trace hub swept");
                }
                let expired = state.interventions.sweep();
                if expired > 0 {
                    tracing::info!(expired, "interventions expired");
                }
            }
        });
    }
    {
        let state = state.clone();
        let cadence = Duration::from_secs(state.config.limits.job_sweep_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cadence);
            loop {
                interval.tick().await;
                let hub = state.hub.clone();
                let removed = state
                    .jobs
                    .sweep(Duration::from_secs(3600), |trace_id| {
                        hub.is_delivered_or_expired(trace_id)
                    });
                if removed > 0 {
                    tracing::debug!(removed, "job registry swept");
                }
            }
        });
    }
}

/// ctrl-c → stop intake, give active turns a bounded drain, then return so
/// axum closes. Teardown order is the reverse of init.
async fn shutdown_signal(state: AppState) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    let grace = Duration::from_secs(state.config.limits.shutdown_grace_seconds);
    tracing::info!(grace_secs = grace.as_secs(), "shutdown requested, draining turns");

    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let active = state.config.limits.max_concurrent_turns
            - state.turn_permits.available_permits().min(state.config.limits.max_concurrent_turns);
        if active == 0 {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(active, "drain grace elapsed with turns still active");
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    tracing::info!("drain complete");
}

/// Build a [`CorsLayer`] from the configured allowed origins. Origins may
/// use a trailing `:*` port wildcard; a literal `"*"` allows all origins.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(value) = origin.parse::<HeaderValue>() {
            exact.push(value);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            // The remainder after the prefix must be digits only, so
            // "http://localhost:3000.evil.com" cannot sneak through.
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
