//! `chathub load`: WebSocket load generator.
//!
//! Each simulated client authenticates with its own token, sends a random
//! number of messages at random intervals while pinging in the background,
//! lingers briefly, then closes normally.

use anyhow::{Context, Result};
use chathub_core::issue_token;
use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

const PING_INTERVAL: Duration = Duration::from_secs(5);
const TOKEN_TTL: u64 = 3600;
const LOAD_ROOM: &str = "general";

/// What one simulated client achieved.
#[derive(Debug, Default, Clone, Copy)]
struct ClientStats {
    sent: usize,
    received: usize,
}

pub async fn run(url: &str, secret: &str, clients: usize) -> Result<()> {
    let secret = Arc::new(super::parse_secret(secret)?);
    let started = Instant::now();

    let mut tasks = JoinSet::new();
    for id in 0..clients {
        let url = url.to_string();
        let secret = Arc::clone(&secret);
        tasks.spawn(async move { (id, run_client(id, &url, &secret).await) });
    }

    let mut connected = 0usize;
    let mut failed = 0usize;
    let mut totals = ClientStats::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(stats))) => {
                connected += 1;
                totals.sent += stats.sent;
                totals.received += stats.received;
            }
            Ok((id, Err(e))) => {
                failed += 1;
                warn!(client = id, error = %format!("{e:#}"), "client failed");
            }
            Err(e) => {
                failed += 1;
                warn!(error = %e, "client task panicked");
            }
        }
    }

    println!("Load test finished in {:.1}s", started.elapsed().as_secs_f64());
    println!("  Clients:  {connected} ok, {failed} failed");
    println!("  Sent:     {} messages", totals.sent);
    println!("  Received: {} frames", totals.received);
    Ok(())
}

async fn run_client(id: usize, url: &str, secret: &[u8]) -> Result<ClientStats> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("client {id}: connect to {url} failed"))?;
    let (mut sink, mut stream) = ws.split();

    let username = format!("user{id}");
    let token = issue_token(secret, &username, TOKEN_TTL);
    sink.send(text(json!({"type": "auth", "token": token})))
        .await
        .context("auth send failed")?;
    debug!(client = id, "authenticated");

    let reader = tokio::spawn(async move {
        let mut received = 0usize;
        while let Some(Ok(msg)) = stream.next().await {
            if matches!(msg, Message::Text(_)) {
                received += 1;
            }
        }
        received
    });

    let mut rng = StdRng::from_entropy();
    let total = rng.gen_range(5..=20);
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    let mut sent = 0usize;
    while sent < total {
        let delay = Duration::from_millis(rng.gen_range(100..=1000));
        tokio::select! {
            _ = ping.tick() => {
                sink.send(Message::Ping(Vec::new().into()))
                    .await
                    .context("ping failed")?;
            }
            _ = tokio::time::sleep(delay) => {
                sink.send(text(message_frame(&username, sent)))
                    .await
                    .context("message send failed")?;
                sent += 1;
            }
        }
    }

    let linger = Duration::from_secs(rng.gen_range(1..=3));
    tokio::time::sleep(linger).await;
    sink.send(Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "load test finished".into(),
    })))
    .await
    .context("close failed")?;

    let received = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .unwrap_or(Ok(0))
        .unwrap_or(0);
    Ok(ClientStats { sent, received })
}

fn message_frame(username: &str, seq: usize) -> serde_json::Value {
    json!({
        "type": "message",
        "room": LOAD_ROOM,
        "sender": username,
        "content": format!("message {seq} from {username}"),
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

fn text(value: serde_json::Value) -> Message {
    Message::Text(value.to_string().into())
}
