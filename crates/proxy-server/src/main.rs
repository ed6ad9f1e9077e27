mod config;
mod metrics;
mod proxy;
mod upstream;

use arc_swap::ArcSwap;
use axum::routing::get;
use config::Config;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use proxy::{build_engine, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strainer_cache::{MemoryEntityStore, MemoryMetaStore};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use upstream::UpstreamOrigin;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = if Path::new("config.toml").exists() {
        match Config::load(Path::new("config.toml")) {
            Ok(c) => {
                tracing::info!("loaded config from config.toml");
                c
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load config.toml, using defaults");
                Config::default_config()
            }
        }
    } else {
        tracing::info!("no config.toml found, using defaults");
        Config::default_config()
    };

    let prom_handle = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "prometheus recorder unavailable, /metrics disabled");
            None
        }
    };

    // Stores outlive any single engine; reloads rebuild the engine around them.
    let engine = build_engine(
        UpstreamOrigin::new(&config.upstream),
        config.cache.engine_config(),
        Arc::new(MemoryMetaStore::new()),
        Arc::new(MemoryEntityStore::new()),
    );

    let state = Arc::new(AppState {
        engine: ArcSwap::from_pointee(engine),
        max_body_size: config.cache.max_body_size_bytes,
    });

    let shutdown = CancellationToken::new();

    let mut admin_router = metrics::admin_router(Arc::clone(&state));
    if let Some(handle) = prom_handle {
        admin_router = admin_router.route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        );
    }
    let proxy_router = proxy::router(Arc::clone(&state)).layer(TraceLayer::new_for_http());

    let proxy_addr = config.server.listen_addr.clone();
    let metrics_addr = config.server.metrics_addr.clone();

    tracing::info!(
        proxy = %proxy_addr,
        metrics = %metrics_addr,
        upstream = %config.upstream.url,
        default_ttl = ?config.cache.default_ttl_seconds,
        max_body_size = config.cache.max_body_size_bytes,
        "strainer proxy starting"
    );

    let proxy_listener = match tokio::net::TcpListener::bind(&proxy_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %proxy_addr, "failed to bind proxy");
            return;
        }
    };
    let metrics_listener = match tokio::net::TcpListener::bind(&metrics_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %metrics_addr, "failed to bind metrics");
            return;
        }
    };

    spawn_config_watcher(PathBuf::from("config.toml"), config, Arc::clone(&state));

    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(shutdown_clone).await;
    });

    let proxy_future = axum::serve(proxy_listener, proxy_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let metrics_future = axum::serve(metrics_listener, admin_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    tokio::select! {
        result = proxy_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "proxy server error");
            }
        }
        result = metrics_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "metrics server error");
            }
        }
    }

    tracing::info!("strainer proxy shut down");
}

/// Listen for SIGINT (Ctrl+C) or SIGTERM and cancel the shutdown token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "no SIGTERM handler, waiting for Ctrl+C only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    tracing::info!("shutdown signal received, draining connections...");
    token.cancel();
}

/// Watch config.toml and swap in a rebuilt engine when cache or upstream settings change.
fn spawn_config_watcher(config_path: PathBuf, initial_config: Config, state: Arc<AppState>) {
    let current_config = Arc::new(Mutex::new(initial_config));

    let config_path_clone = config_path.clone();
    let mut watcher = match notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                match Config::load(&config_path_clone) {
                    Ok(new_config) => {
                        let mut old = current_config.lock();
                        config::diff_and_apply(&old, &new_config, &state.engine);
                        *old = new_config;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to reload config.toml");
                    }
                }
            }
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "failed to start config watcher");
            return;
        }
    };

    if let Err(e) = watcher.watch(&config_path, RecursiveMode::NonRecursive) {
        tracing::warn!(error = %e, "failed to watch config.toml");
        return;
    }

    // The watcher stops when dropped; keep it for the life of the process.
    std::mem::forget(watcher);
    tracing::info!("config file watcher started");
}
