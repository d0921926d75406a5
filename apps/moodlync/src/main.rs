use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    ClientEvent, RoomClient, RosterState, SendOutcome, SessionState, SessionUser,
    SharedSecretCrypto,
};
use shared::{domain::RoomId, protocol::ChatRoom};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::Settings;

/// Terminal client for MoodLync premium chat rooms.
#[derive(Parser, Debug)]
struct Args {
    /// Settings file, defaults to ./moodlync.toml
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    user_id: Option<i64>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    room_id: Option<i64>,
    #[arg(long)]
    participants_poll_secs: Option<u64>,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(v) = &self.server_url {
            settings.server_url = v.clone();
        }
        if let Some(v) = self.user_id {
            settings.user_id = Some(v);
        }
        if let Some(v) = &self.username {
            settings.username = Some(v.clone());
        }
        if let Some(v) = self.room_id {
            settings.room_id = Some(v);
        }
        if let Some(v) = self.participants_poll_secs.filter(|secs| *secs > 0) {
            settings.participants_poll_secs = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => config::load_settings_from(path, |key| std::env::var(key).ok()),
        None => config::load_settings(),
    };
    args.apply(&mut settings);

    let room_id = RoomId(
        settings
            .room_id
            .context("no room selected: pass --room-id or set MOODLYNC_ROOM_ID")?,
    );
    let secret = settings
        .room_secret
        .clone()
        .context("no room secret: set room_secret in moodlync.toml or MOODLYNC_ROOM_SECRET")?;

    let client = RoomClient::new(
        settings.server_url.clone(),
        Arc::new(SharedSecretCrypto::new(secret.into_bytes())),
    );
    let printer = tokio::spawn(print_events(client.subscribe_events()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let room = start_with_retry(&client, settings.session_user(), room_id, &mut lines).await?;
    println!(
        "Joined \"{}\" ({}), {}/{} participants. Type to chat, /who to list members, /leave to exit.",
        room.name, room.emotion, room.participants, room.max_participants
    );

    let roster = client.participant_roster(room_id);
    let poller = roster.spawn_polling(Duration::from_secs(settings.participants_poll_secs));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "/leave" => break,
                    "/who" => {
                        let _ = roster.refresh().await;
                        print_roster(&roster.state().await);
                    }
                    _ => {
                        let mut draft = line;
                        if client.send(&mut draft).await? == SendOutcome::Sent {
                            info!(room_id = room_id.0, "message sent");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    poller.abort();
    client.stop().await;
    printer.abort();
    Ok(())
}

/// Starts the room session. While the room cannot be loaded the error is
/// shown and the next input line decides: `/quit` or EOF gives up, anything
/// else (Enter, `/retry`) tries again.
async fn start_with_retry<R>(
    client: &Arc<RoomClient>,
    user: Option<SessionUser>,
    room_id: RoomId,
    lines: &mut Lines<R>,
) -> Result<ChatRoom>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let err = match client.start(user.clone(), room_id).await {
            Ok(room) => return Ok(room),
            Err(err) => err,
        };
        // Only a failed room fetch leaves the session idle and retryable.
        if user.is_none() || client.state().await != SessionState::Idle {
            return Err(err);
        }

        println!("* {err:#}");
        println!("* press Enter or type /retry to try again, /quit to exit");
        match lines.next_line().await.context("failed to read stdin")? {
            Some(line) if line.trim() != "/quit" => {
                info!(room_id = room_id.0, "retrying room load");
            }
            _ => return Err(err),
        }
    }
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<ClientEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event),
            Err(RecvError::Lagged(skipped)) => warn!("event printer lagged by {skipped} events"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::MessageReceived(message) => println!(
            "[{}] {}: {}",
            message.timestamp.format("%H:%M"),
            message.username,
            message.content
        ),
        ClientEvent::SessionStateChanged(SessionState::Closed) => {
            println!("* disconnected from room")
        }
        ClientEvent::SessionStateChanged(state) => info!(?state, "session state changed"),
        ClientEvent::ParticipantsUpdated { .. } => {}
        ClientEvent::ParticipantsUnavailable { message, .. } => {
            println!("* failed to load participants: {message} (type /who to retry)")
        }
        // Reported inline by `start_with_retry`.
        ClientEvent::RoomUnavailable { .. } => {}
        ClientEvent::ConnectionIssue(notice) => println!("* {notice}"),
    }
}

fn print_roster(state: &RosterState) {
    match state {
        RosterState::Loading => println!("* participants loading"),
        RosterState::Failed(message) => println!("* failed to load participants: {message}"),
        RosterState::Ready(participants) => {
            println!("* {} participant(s):", participants.len());
            for participant in participants {
                let badge = if participant.is_admin { " (admin)" } else { "" };
                println!("  - {}{badge}", participant.username);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
