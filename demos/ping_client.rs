//! Ping client for a running relaybus master.
//!
//! Run with: cargo run --example ping_client -- [ADDRESS] [PORT]
//!
//! Connects, sends a numbered ping every second and logs each pong with its
//! round trip time. Stops on Ctrl+C.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relaybus::endpoint::{Client, ClientHooks, ClientOptions, Connection};
use relaybus::handlers::handler;
use relaybus::master::msg_types;
use relaybus::transport::TcpTransport;

#[derive(Default)]
struct PingHooks {
    connected: bool,
}

impl ClientHooks for PingHooks {
    fn on_connected(&mut self, conn: &Connection) {
        info!(address = %conn.address(), "Connected to master");
        self.connected = true;
    }

    fn on_disconnected(&mut self) {
        warn!("Disconnected from master");
        self.connected = false;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let options = ClientOptions {
        address: args.next().unwrap_or_else(|| "localhost".to_string()),
        port: args.next().map(|p| p.parse()).transpose()?.unwrap_or(5000),
        ..ClientOptions::default()
    };

    let transport = Arc::new(TcpTransport::new(
        tokio::runtime::Handle::current(),
        "0.0.0.0",
        options.max_frame_size,
    ));
    let mut client = Client::new(transport, options, PingHooks::default());

    let sent_at: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let pongs = Arc::new(AtomicU64::new(0));
    {
        let sent_at = Arc::clone(&sent_at);
        let pongs = Arc::clone(&pongs);
        client.register_handler(
            msg_types::PONG,
            handler(move |msg| {
                let rtt = sent_at
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .map(|t| t.elapsed());
                pongs.fetch_add(1, Ordering::Relaxed);
                info!(
                    payload = %String::from_utf8_lossy(msg.payload),
                    rtt_ms = rtt.map(|d| d.as_secs_f64() * 1000.0),
                    "Pong"
                );
            }),
        );
    }

    client.connect()?;

    let mut tick = tokio::time::interval(Duration::from_millis(16));
    let mut ping = tokio::time::interval(Duration::from_secs(1));
    let mut seq = 0u64;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                client.pump();
                if !client.is_connected() && !client.is_connecting() {
                    warn!("Connection lost, exiting");
                    break;
                }
            }
            _ = ping.tick(), if client.hooks().connected => {
                seq += 1;
                *sent_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
                client.send_msg(msg_types::PING, format!("ping #{}", seq).as_bytes());
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    client.stop();
    info!(
        sent = seq,
        received = pongs.load(Ordering::Relaxed),
        "Ping client finished"
    );
    Ok(())
}
