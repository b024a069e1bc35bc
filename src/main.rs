use std::{net::SocketAddr, sync::Arc};

use hanabi::{
    chat::LogMessenger,
    common::logger,
    configs::{Config, TransportKind},
    engine::LavalinkClient,
    gateway::DetachedGateway,
    interop::{ChannelClient, ChannelTransport, HttpTransport, Interop, PeerTransport},
    manager::{SessionManager, peers, tasks},
    session::SessionContext,
    store::MemoryStore,
    transport::{self, AppState},
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::load()?;
    logger::init(&config);

    let (events_tx, events_rx) = flume::unbounded();
    let engine = Arc::new(LavalinkClient::new(
        config.engine.clone(),
        events_tx,
        config.session.rpc_timeout(),
    )?);
    tokio::spawn(engine.clone().run());

    // A peer's link to the coordinator. Channel links are dialled below,
    // once the interop handler they serve exists.
    let mut coordinator_channel = None;
    let coordinator: Option<Arc<dyn PeerTransport>> = match config.fleet.coordinator.as_ref() {
        Some(link) if !config.fleet.is_coordinator() => match link.transport {
            TransportKind::Http => Some(Arc::new(HttpTransport::new(
                link.endpoint.clone(),
                config.server.password.clone(),
                config.session.rpc_timeout(),
            )?)),
            TransportKind::Channel => {
                let channel = Arc::new(ChannelTransport::new(link.name.clone()));
                coordinator_channel = Some((channel_url(&link.endpoint), channel.clone()));
                Some(channel)
            }
        },
        _ => None,
    };

    let ctx = SessionContext {
        process: config.fleet.name.clone(),
        engine: engine.clone(),
        gateway: Arc::new(DetachedGateway::open()),
        chat: Arc::new(LogMessenger::default()),
        store: Arc::new(MemoryStore::new()),
        config: config.session.clone(),
        coordinator,
    };
    let manager = SessionManager::new(config.fleet.role, ctx, peers::from_config(&config)?);
    let interop = Arc::new(Interop::new(manager.clone())?);
    tasks::spawn_all(&manager, events_rx);

    if let Some((url, channel)) = coordinator_channel {
        let client = ChannelClient::new(
            url,
            config.server.password.clone(),
            config.fleet.name.clone(),
            config.session.rpc_timeout(),
            config.fleet.max_reconnect_attempts,
            channel,
            interop.clone(),
            manager.shutdown_token(),
        );
        tokio::spawn(client.run());
    }

    let state = Arc::new(AppState {
        password: config.server.password.clone(),
        rpc_timeout: config.session.rpc_timeout(),
        interop,
    });
    let app = transport::http_server::router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let address: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(
        "{} listening on {} as {:?}",
        config.fleet.name, address, config.fleet.role
    );

    let shutdown = manager.shutdown_token();
    let requested = tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned()) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
            true
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            false
        }
    };

    let code = if requested {
        let kind = manager.shutdown_kind();
        manager.stop(Some(kind)).await;
        kind.exit_code()
    } else {
        manager.stop(None).await;
        shutdown.cancel();
        0
    };
    engine.shutdown();
    info!("Goodbye");
    std::process::exit(code);
}

/// `http://host:port` to the coordinator's operation-channel URL.
fn channel_url(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}{}", base, transport::http_server::INTEROP_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_urls_follow_the_endpoint_scheme() {
        assert_eq!(channel_url("http://10.0.0.2:8080/"), "ws://10.0.0.2:8080/interop");
        assert_eq!(channel_url("https://parent.example"), "wss://parent.example/interop");
    }
}
