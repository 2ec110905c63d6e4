//! WebSocket transport for the signaling link, plus the relay wake probe.

use crate::config::{RelayConfig, WakeConfig};
use crate::error::SignalError;
use crate::session::{EventSink, SignalingEvent};
use crate::signaling::{decode, RelayConnector, SignalingLink, WireCommand};
use futures_util::{SinkExt, StreamExt};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// When the relay last answered the probe with "waking up". Shared by every session in the process.
static LAST_WAKE: Lazy<Mutex<Option<Instant>>> = Lazy::new(|| Mutex::new(None));

fn last_wake() -> Option<Instant> {
    match LAST_WAKE.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

fn record_wake(at: Instant) {
    match LAST_WAKE.lock() {
        Ok(mut guard) => *guard = Some(at),
        Err(poisoned) => *poisoned.into_inner() = Some(at),
    }
}

fn wake_due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last {
        Some(last) => now.saturating_duration_since(last) >= interval,
        None => true,
    }
}

#[derive(Debug, Default, Deserialize)]
struct WakeReply {
    #[serde(default)]
    message: String,
}

impl WakeReply {
    fn is_waking(&self) -> bool {
        self.message.to_lowercase().contains("waking up")
    }
}

/// Connects sessions to the relay over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketRelay {
    config: RelayConfig,
    client: reqwest::Client,
}

impl WebSocketRelay {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            config: config.clone(),
            client: reqwest::Client::new(),
        }
    }
}

impl RelayConnector for WebSocketRelay {
    fn connect(&self, sink: EventSink) -> SignalingLink {
        let (wire, commands) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(
            self.config.clone(),
            self.client.clone(),
            sink,
            commands,
        ));
        SignalingLink::new(wire)
    }
}

/// Pings the relay's HTTP endpoint so a sleeping host starts booting. Never fails.
async fn ensure_awake(wake: &WakeConfig, client: &reqwest::Client, sink: &EventSink) {
    if !wake.enabled {
        return;
    }
    let now = Instant::now();
    if !wake_due(last_wake(), now, wake.interval()) {
        debug!("Relay woken recently, skipping probe");
        return;
    }

    let reply = client
        .get(&wake.url)
        .header(reqwest::header::CACHE_CONTROL, "no-store")
        .timeout(wake.timeout())
        .send()
        .await;

    let response = match reply {
        Ok(response) => response,
        Err(e) => {
            warn!("Wake probe to {} failed: {e}", wake.url);
            return;
        }
    };

    match response.json::<WakeReply>().await {
        Ok(reply) if reply.is_waking() => {
            record_wake(now);
            let warmup = wake.warmup();
            info!("Relay is waking up, connecting in {warmup:?}");
            sink.relay(SignalingEvent::Waking(warmup));
            tokio::time::sleep(warmup).await;
        }
        Ok(_) => debug!("Relay awake"),
        Err(e) => debug!("Wake probe reply ignored: {e}"),
    }
}

async fn run_socket(
    config: RelayConfig,
    client: reqwest::Client,
    sink: EventSink,
    mut commands: mpsc::UnboundedReceiver<WireCommand>,
) {
    ensure_awake(&config.wake, &client, &sink).await;

    info!("Connecting to relay {}", config.url);
    let timeout = config.connect_timeout();
    let stream = match tokio::time::timeout(timeout, connect_async(config.url.as_str())).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            sink.relay(SignalingEvent::Failed(SignalError::Socket(e.to_string())));
            return;
        }
        Err(_) => {
            sink.relay(SignalingEvent::Failed(SignalError::Timeout(timeout)));
            return;
        }
    };
    sink.relay(SignalingEvent::Opened);

    let (mut writer, mut reader) = stream.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(WireCommand::Text(text)) => {
                    if let Err(e) = writer.send(Message::Text(text.into())).await {
                        sink.relay(SignalingEvent::SendFailed(e.to_string()));
                    }
                }
                Some(WireCommand::Close) | None => {
                    debug!("Closing relay socket");
                    let _ = writer.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode(text.as_str()) {
                    Ok(Some(message)) => sink.relay(SignalingEvent::Message(message)),
                    Ok(None) => {}
                    Err(e) => warn!("Dropping relay frame: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    sink.relay(SignalingEvent::Closed);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    sink.relay(SignalingEvent::Failed(SignalError::Socket(e.to_string())));
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_probe_is_always_due() {
        assert!(wake_due(None, Instant::now(), Duration::from_secs(300)));
    }

    #[test]
    fn probe_waits_out_the_interval() {
        let woke = Instant::now();
        let interval = Duration::from_secs(300);
        assert!(!wake_due(Some(woke), woke + Duration::from_secs(299), interval));
        assert!(wake_due(Some(woke), woke + interval, interval));
    }

    #[test]
    fn waking_reply_detection() {
        let reply: WakeReply = serde_json::from_str(r#"{"message":"Server is waking up"}"#).unwrap();
        assert!(reply.is_waking());
        let reply: WakeReply = serde_json::from_str(r#"{"message":"pong"}"#).unwrap();
        assert!(!reply.is_waking());
        let reply: WakeReply = serde_json::from_str("{}").unwrap();
        assert!(!reply.is_waking());
    }

    #[tokio::test]
    async fn disabled_probe_returns_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx, Default::default());
        let wake = WakeConfig {
            enabled: false,
            ..WakeConfig::default()
        };
        ensure_awake(&wake, &reqwest::Client::new(), &sink).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unreachable_relay_reports_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx, Default::default());
        let config = RelayConfig {
            url: "ws://127.0.0.1:1/api/matchmaking".into(),
            connect_timeout_secs: 2,
            wake: WakeConfig {
                enabled: false,
                ..WakeConfig::default()
            },
        };
        let (_wire, commands) = mpsc::unbounded_channel();
        run_socket(config, reqwest::Client::new(), sink, commands).await;

        match rx.try_recv() {
            Ok(crate::session::SessionEvent::Relay(_, SignalingEvent::Failed(_))) => {}
            other => panic!("expected a relay failure, got {other:?}"),
        }
    }
}
