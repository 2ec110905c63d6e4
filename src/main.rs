use chrono::Local;
use clap::Parser;
use pairchat::config::{SessionConfig, DEFAULT_LOG_FILTER};
use pairchat::peer::{RtcTransportFactory, SampleTrackSource};
use pairchat::session::{ChannelObserver, Collaborators, SessionHandle, UiEvent};
use pairchat::{logger, SessionDriver, WebSocketRelay};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, warn};

/// Grace period for the farewell frames after the session ends.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(300);

#[derive(Parser, Debug)]
#[command(name = "pairchat")]
#[command(about = "Pair with a stranger over a relay and talk over a direct link")]
struct Cli {
    #[arg(long, value_name = "PATH", help = "JSON config file")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "URL", help = "Override the relay WebSocket endpoint")]
    relay_url: Option<String>,
    #[arg(long = "topic", value_name = "TOPIC", help = "Interest tag sent with the pairing request")]
    topics: Vec<String>,
    #[arg(long, help = "Skip the relay wake probe")]
    no_wake: bool,
}

fn load_config(cli: &Cli) -> Result<SessionConfig, pairchat::error::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    }
    .with_env_overrides();

    if let Some(url) = &cli.relay_url {
        config.relay.url = url.clone();
    }
    if !cli.topics.is_empty() {
        config.topics = cli.topics.clone();
    }
    if cli.no_wake {
        config.relay.wake.enabled = false;
    }
    config.validate()?;
    Ok(config)
}

fn stamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn print_ui_event(event: &UiEvent) {
    match event {
        UiEvent::State(state) => println!("[{}] * {state}", stamp()),
        UiEvent::LocalMedia { stream_id, tracks } => {
            println!("[{}] * local media {stream_id} ({tracks} tracks)", stamp())
        }
        UiEvent::RemoteMedia { stream_id, track_id } => {
            println!("[{}] * remote track {track_id} in {stream_id}", stamp())
        }
        UiEvent::RemoteCamera(enabled) => {
            let word = if *enabled { "on" } else { "off" };
            println!("[{}] * partner camera {word}", stamp())
        }
        UiEvent::Chat(text) => println!("[{}] partner: {text}", stamp()),
        UiEvent::RelayWaking(warmup) => {
            println!("[{}] * relay is waking up, retrying in {}s", stamp(), warmup.as_secs())
        }
        UiEvent::Error(message) => println!("[{}] ! {message}", stamp()),
    }
}

async fn read_commands(handle: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                let _ = handle.leave();
                break;
            }
            Err(e) => {
                warn!("stdin: {e}");
                break;
            }
        };

        let sent = match line.trim() {
            "" => continue,
            "start" => handle.start_pairing(),
            "abort" => handle.abort_pairing(),
            "leave" => handle.leave(),
            "cam" => handle.toggle_camera(),
            text => handle.send_chat(text),
        };
        if sent.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() {
    logger::init(DEFAULT_LOG_FILTER);
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    let (observer, mut ui_events) = ChannelObserver::new();
    let collaborators = Collaborators {
        media: Arc::new(SampleTrackSource),
        transport: Arc::new(RtcTransportFactory::new(&config)),
        relay: Arc::new(WebSocketRelay::new(&config.relay)),
        observer: Arc::new(observer),
    };

    tokio::spawn(async move {
        while let Some(event) = ui_events.recv().await {
            print_ui_event(&event);
        }
    });

    let driver = SessionDriver::start(config, collaborators).await;
    tokio::spawn(read_commands(driver.handle()));

    let state = driver.run().await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    println!("[{}] session ended: {state}", stamp());
    // A pending stdin read would otherwise hold the runtime open.
    std::process::exit(0);
}
