use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use sayit_core::ChatService;
use sayit_types::events::{GatewayCommand, GatewayEvent};
use sayit_types::models::Target;

use crate::commands::{self, Applied};
use crate::identity::verify_token;

/// Connection timing.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// How long a fresh socket has to send `Identify`.
    pub identify: Duration,
    /// The server pings this often; two missed pongs drop the connection.
    pub heartbeat: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            identify: Duration::from_secs(10),
            heartbeat: Duration::from_secs(15),
        }
    }
}

/// Handle a single WebSocket connection: Identify, Ready, then commands in and
/// subscription frames out until either side goes away.
pub async fn handle_connection(socket: WebSocket, chat: ChatService, jwt_secret: String) {
    handle_connection_with(socket, chat, jwt_secret, Timeouts::default()).await
}

/// [`handle_connection`] with explicit timeouts.
pub async fn handle_connection_with(socket: WebSocket, chat: ChatService, jwt_secret: String, timeouts: Timeouts) {
    let (mut sender, mut receiver) = socket.split();

    let Some(user_id) = wait_for_identify(&mut receiver, &jwt_secret, timeouts.identify).await else {
        warn!("WebSocket client failed to identify, closing");
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    // One subscriber per connection; every subscription shares its channel.
    let subscriber_id = Uuid::new_v4();
    info!("{} connected to gateway as subscriber {}", user_id, subscriber_id);

    let ready = GatewayEvent::Ready {
        user_id,
        subscriber_id,
    };
    chat.connect(user_id);
    if !send_event(&mut sender, &ready).await {
        mark_offline(chat, user_id).await;
        return;
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<GatewayEvent>();
    let targets: Arc<Mutex<HashSet<Target>>> = Arc::new(Mutex::new(HashSet::new()));

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward snapshots and events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(timeouts.heartbeat);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client. Each one finishes before the next starts, so
    // a Subscribe followed by an Unsubscribe is applied in that order.
    let recv_chat = chat.clone();
    let recv_targets = targets.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&recv_chat, user_id, subscriber_id, &event_tx, &recv_targets, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let _ = event_tx.send(GatewayEvent::Error {
                            code: "BAD_COMMAND".into(),
                            message: e.to_string(),
                        });
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let targets: Vec<Target> = targets
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();
    for target in &targets {
        chat.unsubscribe(subscriber_id, *target);
    }
    mark_offline(chat, user_id).await;
    info!(
        "{} disconnected from gateway ({} subscriptions closed)",
        user_id,
        targets.len()
    );
}

async fn mark_offline(chat: ChatService, user_id: Uuid) {
    let result = tokio::task::spawn_blocking(move || chat.disconnect(user_id)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("{} last seen not recorded: {}", user_id, e),
        Err(e) => error!("spawn_blocking join error: {}", e),
    }
}

async fn handle_command(
    chat: &ChatService,
    user_id: Uuid,
    subscriber_id: Uuid,
    events: &mpsc::UnboundedSender<GatewayEvent>,
    targets: &Arc<Mutex<HashSet<Target>>>,
    cmd: GatewayCommand,
) {
    let chat = chat.clone();
    let sender = events.clone();
    let result =
        tokio::task::spawn_blocking(move || commands::apply(&chat, user_id, subscriber_id, &sender, cmd)).await;

    match result {
        Ok(Ok(Applied::Subscribed(target))) => {
            targets
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(target);
        }
        Ok(Ok(Applied::Unsubscribed(target))) => {
            targets
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&target);
        }
        Ok(Ok(Applied::Done)) => {}
        Ok(Err(e)) => {
            warn!("{} command rejected: {}", user_id, e);
            let _ = events.send(commands::error_frame(&e));
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
        }
    }
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
    timeout: Duration,
) -> Option<Uuid> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    return match verify_token(&token, jwt_secret) {
                        Ok(user_id) => Some(user_id),
                        Err(e) => {
                            warn!("Identify rejected: {}", e);
                            None
                        }
                    };
                }
            }
        }
        None
    };

    tokio::time::timeout(timeout, identify)
        .await
        .ok()
        .flatten()
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
