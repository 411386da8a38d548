//! Tick loops that drive servers and clients.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::endpoint::{Client, ClientHooks, Server, ServerHooks};

/// Pump `server` every `tick` until `shutdown` resolves, then shut it down
/// gracefully within `grace`.
pub async fn run_server<H, F>(server: &mut Server<H>, tick: Duration, grace: Duration, shutdown: F)
where
    H: ServerHooks,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(tick_ms = tick.as_millis() as u64, "Server tick loop running");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                server.pump();
            }
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    shutdown_server(server, tick, grace).await;
}

/// Ask every peer to disconnect, keep pumping until the table drains or
/// `grace` elapses, then stop the server.
pub async fn shutdown_server<H: ServerHooks>(server: &mut Server<H>, tick: Duration, grace: Duration) {
    let pending = server.disconnect_all();
    if pending > 0 {
        info!(connections = pending, "Waiting for connections to drain");
        let drained = timeout(grace, drain(server, tick)).await.is_ok();
        if drained {
            info!("All connections drained");
        } else {
            warn!(
                remaining = server.connection_count(),
                grace_ms = grace.as_millis() as u64,
                "Shutdown grace period elapsed, closing remaining connections"
            );
        }
    }

    server.stop();
}

async fn drain<H: ServerHooks>(server: &mut Server<H>, tick: Duration) {
    loop {
        server.pump();
        if server.connection_count() == 0 {
            return;
        }
        debug!(
            active = server.connection_count(),
            "Waiting for connections to drain"
        );
        sleep(tick).await;
    }
}

/// Pump `client` every `tick` until `shutdown` resolves, then stop it.
pub async fn run_client<H, F>(client: &mut Client<H>, tick: Duration, shutdown: F)
where
    H: ClientHooks,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                client.pump();
            }
            _ = &mut shutdown => {
                break;
            }
        }
    }

    client.stop();
    client.pump();
}
