//! commlink client daemon.
//!
//! Loads `commlink.yaml` (or the path given as the first argument), connects
//! with the configured connection string, gossips position and profile, and
//! serves the ops endpoints until Ctrl+C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commlink_client::{
    app_state::AppState,
    config,
    dispatch::{CommsEvent, CommsEventKind},
    obs::CommsMetrics,
    orchestrator::{CommsHandle, Orchestrator, OrchestratorConfig, OrchestratorSetup},
    router,
    transport::{TransportConnectors, TransportRegistry},
};
use commlink_core::error::{CommsError, Result};
use commlink_core::protocol::Position;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "commlink.yaml".into());
    let cfg = config::load_from_file(&path)?;
    let identity = cfg.identity.to_identity();
    let metrics = Arc::new(CommsMetrics::default());
    let registry = Arc::new(TransportRegistry::with_defaults());
    tracing::info!(protocols = ?registry.protocols(), address = %identity.address, "commlink starting");

    let start = cfg.client.start();
    let (comms, actor) = Orchestrator::spawn(OrchestratorSetup {
        config: OrchestratorConfig::from(&cfg.comms),
        identity: identity.clone(),
        registry,
        connectors: TransportConnectors::default(),
        metrics: Arc::clone(&metrics),
        initial_position: start,
    });
    comms.set_profile(
        cfg.profile.to_profile(&identity.address),
        cfg.profile.base_url.clone(),
    );
    comms.set_island(cfg.comms.island_id.clone());

    tokio::spawn(log_room_events(comms.clone()));
    if let Some(radius) = cfg.client.walk_radius {
        tokio::spawn(walk(comms.clone(), start, radius));
    }

    if let Err(e) = comms
        .connect(cfg.comms.connection_string.clone(), cfg.comms.island_id.clone())
        .await
    {
        tracing::error!(error = %e, code = e.code().as_str(), "initial connection failed");
    }

    if cfg.ops.enabled {
        let listen: SocketAddr = cfg
            .ops
            .listen
            .parse()
            .map_err(|e| CommsError::Construction(format!("ops.listen: {e}")))?;
        let app = router::build_router(AppState::new(comms.clone(), metrics));
        let listener = tokio::net::TcpListener::bind(listen)
            .await
            .map_err(|e| CommsError::Internal(format!("bind {listen}: {e}")))?;
        tracing::info!(%listen, "ops endpoints listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| CommsError::Internal(format!("ops server failed: {e}")))?;
    } else {
        shutdown_signal().await;
    }

    comms.shutdown().await?;
    let _ = actor.await;
    Ok(())
}

/// Log chat and peer presence of whichever room is current.
async fn log_room_events(comms: CommsHandle) {
    let mut rooms = comms.watch_room();
    loop {
        let current = rooms.borrow_and_update().clone();
        if let Some(current) = current {
            let protocol = current.protocol.clone();
            current.room.events().subscribe(CommsEventKind::ChatMessage, move |ev| {
                if let CommsEvent::ChatMessage(chat) = ev {
                    tracing::info!(from = %chat.address, protocol = %protocol, "chat: {}", chat.data.message);
                }
            });
            current.room.events().subscribe(CommsEventKind::PeerConnected, |ev| {
                if let CommsEvent::PeerConnected(peer) = ev {
                    tracing::debug!(peer = %peer.address, "peer connected");
                }
            });
            current.room.events().subscribe(CommsEventKind::PeerDisconnected, |ev| {
                if let CommsEvent::PeerDisconnected(peer) = ev {
                    tracing::debug!(peer = %peer.address, "peer disconnected");
                }
            });
        }
        if rooms.changed().await.is_err() {
            break;
        }
    }
}

/// Walk a circle around the start position.
async fn walk(comms: CommsHandle, center: Position, radius: f32) {
    let mut tick = tokio::time::interval(Duration::from_millis(100));
    let mut angle = 0f32;
    loop {
        tick.tick().await;
        angle = (angle + 0.02) % std::f32::consts::TAU;
        let mut p = center;
        p.position_x = center.position_x + radius * angle.cos();
        p.position_z = center.position_z + radius * angle.sin();
        p.rotation_y = (angle / 2.0).sin();
        p.rotation_w = (angle / 2.0).cos();
        comms.report_position(p);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("signal received, shutting down comms");
}
