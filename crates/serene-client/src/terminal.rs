//! Line-oriented terminal front end.

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

use serene_shared::{ChannelId, UserId};
use serene_store::Delivery;

use crate::config::ClientConfig;
use crate::context::ChatContext;
use crate::events::{NotificationLevel, UiEvent};

const UI_BUFFER: usize = 256;

const HELP: &str = "\
commands:
  /channels                 list channels
  /users                    list users
  /join <channel-id>        select a channel
  /history                  show the selected channel
  /create <name> [user..]   create a channel with members
  /quit                     leave
anything else is sent to the selected channel";

pub async fn run_terminal(config: ClientConfig) -> anyhow::Result<()> {
    let (ui_tx, ui_rx) = mpsc::channel(UI_BUFFER);
    let mut context = ChatContext::new(&config, ui_tx).context("failed to build chat context")?;
    let printer = tokio::spawn(print_events(ui_rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let user_id = match config.user_id.clone() {
        Some(id) => id,
        None => match prompt_user_id(&mut lines).await? {
            Some(id) => id,
            None => return Ok(()),
        },
    };

    let state = context.start(user_id.clone()).await?;
    println!("logged in as {user_id} ({state}); /help for commands");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut words = line.split_whitespace();
        match words.next() {
            Some("/quit") | Some("/exit") => break,
            Some("/help") => println!("{HELP}"),
            Some("/channels") => {
                for channel in context.channels()? {
                    let unread = if channel.unread_count > 0 {
                        format!(" ({} unread)", channel.unread_count)
                    } else {
                        String::new()
                    };
                    println!("  {}  {}{unread}", channel.id, channel.name);
                }
            }
            Some("/users") => {
                for user in context.users()? {
                    println!("  {}  {}", user.id, user.name);
                }
            }
            Some("/join") => match words.next() {
                Some(id) => {
                    if let Err(e) = context.select_channel(&ChannelId::from(id)).await {
                        println!("! {e}");
                    } else {
                        print_history(&context)?;
                    }
                }
                None => println!("usage: /join <channel-id>"),
            },
            Some("/history") => print_history(&context)?,
            Some("/create") => match words.next() {
                Some(name) => {
                    let members: Vec<UserId> = words.map(UserId::from).collect();
                    // Failures arrive as notifications.
                    let _ = context.create_channel(name, &members).await;
                }
                None => println!("usage: /create <name> [user-id ...]"),
            },
            Some(cmd) if cmd.starts_with('/') => println!("unknown command {cmd}; /help"),
            _ => {
                if let Err(e) = context.send_text(line).await {
                    println!("! {e}");
                }
            }
        }
    }

    context.stop().await;
    printer.abort();
    Ok(())
}

async fn prompt_user_id(lines: &mut Lines<BufReader<Stdin>>) -> anyhow::Result<Option<UserId>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"user id: ").await?;
    stdout.flush().await?;

    Ok(lines
        .next_line()
        .await?
        .map(|line| line.trim().to_string())
        .filter(|id| !id.is_empty())
        .map(UserId::new))
}

fn print_history(context: &ChatContext) -> anyhow::Result<()> {
    let Some(channel_id) = context.selected_channel()? else {
        println!("no channel selected; /join <channel-id>");
        return Ok(());
    };

    for message in context.channel_messages(&channel_id)? {
        let when = message
            .timestamp
            .map(|ts| ts.format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string());
        let marker = match message.delivery {
            Delivery::Pending => " (sending)",
            Delivery::Failed => " (failed)",
            Delivery::Confirmed => "",
        };
        println!("[{when}] {}: {}{marker}", message.sender, message.preview());
    }
    Ok(())
}

async fn print_events(mut ui_rx: mpsc::Receiver<UiEvent>) {
    while let Some(event) = ui_rx.recv().await {
        match event {
            UiEvent::ConnectionChanged { state } => println!("* connection {state}"),
            UiEvent::MessageReceived { message } => {
                println!("#{} {}: {}", message.channel_id, message.sender, message.preview());
            }
            UiEvent::UnreadChanged {
                channel_id,
                unread_count,
            } if unread_count > 0 => println!("* {channel_id}: {unread_count} unread"),
            UiEvent::Notification { level, message } => match level {
                NotificationLevel::Info => println!("* {message}"),
                NotificationLevel::Error => println!("! {message}"),
            },
            UiEvent::MessageConfirmed { .. }
            | UiEvent::ScrollToBottom { .. }
            | UiEvent::UnreadChanged { .. } => {}
        }
    }
}
