use anyhow::{Context, Result};
use ecowise::integration::{SessionConfig, SessionController, SessionEvent};
use ecowise::messages::Sender;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "Commands: /mic  /speaker  /cancel  /quit  (anything else is sent as a message)";

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they do not interleave with the chat
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ecowise=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting EcoWise assistant");

    let config = SessionConfig::from_env();
    let session = SessionController::builder()
        .with_config(config)
        .build()
        .context("Failed to start session")?;

    for message in session.messages() {
        println!("{}: {}", label(message.sender), message.text);
    }
    println!("{}", HELP);

    let events = session.subscribe();
    std::thread::spawn(move || {
        for event in events.iter() {
            print_event(&event);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => break,
            "/mic" => {
                session.toggle_capture();
            }
            "/speaker" => session.toggle_output(),
            "/cancel" => session.cancel_exchange(),
            "/help" => println!("{}", HELP),
            text => {
                if session.submit_user_text(text).is_none() && !text.is_empty() {
                    println!("(still answering, wait or /cancel)");
                }
            }
        }
    }

    session.shutdown();
    info!("Goodbye");
    Ok(())
}

fn label(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "you",
        Sender::Assistant => "ecowise",
    }
}

fn print_event(event: &SessionEvent) {
    let mut stdout = std::io::stdout();
    let _ = match event {
        SessionEvent::MessageAppended(message) if message.sender == Sender::Assistant => {
            write!(stdout, "{}: {}", label(message.sender), message.text)
        }
        SessionEvent::MessageUpdated { text, .. } => {
            // Redraw the streaming line with the full text so far
            write!(stdout, "\r{}: {}", label(Sender::Assistant), text)
        }
        SessionEvent::ExchangeStateChanged(ecowise::llm::ExchangeState::Idle) => writeln!(stdout),
        SessionEvent::CaptureChanged(active) => {
            writeln!(stdout, "[mic {}]", if *active { "on" } else { "off" })
        }
        SessionEvent::PendingInputChanged(text) if !text.is_empty() => {
            writeln!(stdout, "[heard] {}", text)
        }
        SessionEvent::OutputToggled(enabled) => {
            writeln!(stdout, "[speaker {}]", if *enabled { "on" } else { "off" })
        }
        SessionEvent::Notice(notice) => writeln!(stdout, "[!] {}", notice.text()),
        _ => Ok(()),
    };
    let _ = stdout.flush();
}
