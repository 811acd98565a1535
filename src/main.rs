use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use live_interview::audio::CpalBackend;
use live_interview::channel::loopback::LoopbackConnector;
use live_interview::kernel::event::Speaker;
use live_interview::kernel::transcript::TranscriptCursor;
use live_interview::{EngineConfig, InjectAs, SessionController, SessionHandle, SessionState};

const TRANSCRIPT_POLL: Duration = Duration::from_millis(250);

const HELP: &str = "commands: check | tone | connect | mute | unmute | say <text> | code <text> | status | end | reset | quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(&path).with_context(|| format!("loading config from {}", path))?,
        None => EngineConfig::default(),
    }
    .with_env_overrides();

    tracing::info!(
        "Interview console: {} with {} ({}Hz up, {}Hz down)",
        config.session.role,
        config.session.persona,
        config.session.capture_rate,
        config.session.output_rate
    );

    let connector = LoopbackConnector {
        open_delay: Duration::from_millis(300),
    };
    let session = SessionController::spawn(config, Arc::new(CpalBackend), Arc::new(connector));

    let mut states = session.state_changes();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            println!(">> state: {:?}", state);
        }
    });

    tokio::spawn(follow_transcript(session.clone()));

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                if !dispatch(&session, line.trim()).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if !session.state().is_terminal() && session.state() != SessionState::Idle {
        let _ = session.end_call().await;
    }
    tracing::info!("Console exiting");
    Ok(())
}

/// Run one console command. Returns false to quit.
async fn dispatch(session: &SessionHandle, line: &str) -> bool {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));

    let outcome = match cmd {
        "" => Ok(()),
        "check" => session.check_devices().await.map(|_| ()),
        "tone" => session.play_test_sound().await,
        "connect" => session.connect().await.map(|_| ()),
        "mute" => {
            session.set_muted(true);
            Ok(())
        }
        "unmute" => {
            session.set_muted(false);
            Ok(())
        }
        "say" => session.inject_text(rest, InjectAs::User).await,
        "code" => session.inject_text(format!("Code submission:\n{}", rest), InjectAs::System).await,
        "status" => {
            print_status(session).await;
            Ok(())
        }
        "end" => session.end_call().await.map(|_| ()),
        "reset" => session.reset().await.map(|_| ()),
        "quit" | "exit" => return false,
        _ => {
            println!("{}", HELP);
            Ok(())
        }
    };

    if let Err(e) = outcome {
        println!("!! {}", e);
    }
    true
}

async fn print_status(session: &SessionHandle) {
    let snapshot = match session.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            println!("!! {}", e);
            return;
        }
    };

    println!(
        "state={:?} muted={} volume={:.3} agent_speaking={} queued={}",
        snapshot.state, snapshot.muted, snapshot.volume, snapshot.agent_speaking, snapshot.scheduled_items
    );
    for line in &snapshot.logs {
        println!("  {}", line);
    }
    for utterance in &snapshot.transcript {
        let marker = if utterance.complete { "" } else { " ..." };
        println!("  [{}] {}{}", who(utterance.speaker), utterance.text, marker);
    }
}

fn who(speaker: Speaker) -> &'static str {
    match speaker {
        Speaker::User => "you",
        Speaker::Agent => "agent",
        Speaker::System => "system",
    }
}

/// Print each utterance as it appears and every piece of text appended to
/// it afterwards. Stops when the controller goes away.
async fn follow_transcript(session: SessionHandle) {
    let mut cursor = TranscriptCursor::new();
    let mut ticker = tokio::time::interval(TRANSCRIPT_POLL);

    loop {
        ticker.tick().await;
        let Ok(snapshot) = session.snapshot().await else { break };
        for growth in cursor.advance(&snapshot.transcript) {
            let lead = if growth.continued { "..." } else { "" };
            println!("  [{}] {}{}", who(growth.speaker), lead, growth.text);
        }
    }
}
