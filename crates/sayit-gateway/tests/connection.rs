use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header, encode};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use sayit_core::{ChatConfig, ChatService};
use sayit_db::Database;
use sayit_gateway::connection::{Timeouts, handle_connection_with};
use sayit_types::api::Claims;
use sayit_types::events::{GatewayCommand, GatewayEvent, SnapshotState};
use sayit_types::models::Target;

const SECRET: &str = "gateway-test-secret";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Gateway {
    _dir: TempDir,
    chat: ChatService,
    addr: SocketAddr,
}

async fn gateway() -> Gateway {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::open(&dir.path().join("ws.db")).unwrap());
    let chat = ChatService::new(db, ChatConfig::default());

    let app = Router::new()
        .route("/gateway", get(upgrade))
        .with_state(chat.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Gateway {
        _dir: dir,
        chat,
        addr,
    }
}

async fn upgrade(State(chat): State<ChatService>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let timeouts = Timeouts {
        identify: Duration::from_millis(300),
        ..Timeouts::default()
    };
    ws.on_upgrade(move |socket| handle_connection_with(socket, chat, SECRET.into(), timeouts))
}

fn token(user_id: Uuid, secret: &str) -> String {
    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    encode(
        &Header::default(),
        &Claims {
            sub: user_id,
            exp: exp as usize,
        },
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}/gateway", addr))
        .await
        .unwrap();
    client
}

async fn send(client: &mut Client, cmd: &GatewayCommand) {
    let text = serde_json::to_string(cmd).unwrap();
    client.send(Message::Text(text.into())).await.unwrap();
}

/// Next gateway frame, or None once the server closed the socket.
async fn next_event(client: &mut Client) -> Option<GatewayEvent> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("gateway went quiet");
        match msg {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn eventually(mut done: impl FnMut() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn closing_the_socket_releases_every_subscription() {
    let gw = gateway().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let c = gw.chat.start_conversation(a, &[b]).unwrap().id;
    gw.chat.send_message(a, c, "before").unwrap();

    let mut client = connect(gw.addr).await;
    send(&mut client, &GatewayCommand::Identify { token: token(b, SECRET) }).await;
    match next_event(&mut client).await {
        Some(GatewayEvent::Ready { user_id, .. }) => assert_eq!(user_id, b),
        other => panic!("expected Ready, got {:?}", other),
    }
    assert!(gw.chat.is_online(b));

    let conversation = Target::Conversation(c);
    let directory = Target::Directory(b);
    for target in [conversation, directory] {
        send(&mut client, &GatewayCommand::Subscribe { target }).await;
        match next_event(&mut client).await {
            Some(GatewayEvent::Snapshot { target: got, state }) => {
                assert_eq!(got, target);
                if let SnapshotState::Conversation { messages, .. } = state {
                    assert_eq!(messages.len(), 1);
                }
            }
            other => panic!("expected Snapshot, got {:?}", other),
        }
    }
    assert_eq!(gw.chat.subscriber_count(conversation), 1);
    assert_eq!(gw.chat.subscriber_count(directory), 1);

    client.close(None).await.unwrap();

    eventually(|| {
        gw.chat.subscriber_count(conversation) == 0 && gw.chat.subscriber_count(directory) == 0
    })
    .await;
    eventually(|| !gw.chat.is_online(b)).await;
    let profile = gw.chat.get_profile(b, b).unwrap().unwrap();
    assert!(profile.last_seen_at.is_some());
}

#[tokio::test]
async fn bad_frames_get_an_error_and_the_connection_stays_up() {
    let gw = gateway().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let c = gw.chat.start_conversation(a, &[b]).unwrap().id;

    let mut client = connect(gw.addr).await;
    send(&mut client, &GatewayCommand::Identify { token: token(a, SECRET) }).await;
    assert!(matches!(next_event(&mut client).await, Some(GatewayEvent::Ready { .. })));

    client
        .send(Message::Text("{\"type\":\"Nope\"}".to_string().into()))
        .await
        .unwrap();
    match next_event(&mut client).await {
        Some(GatewayEvent::Error { code, .. }) => assert_eq!(code, "BAD_COMMAND"),
        other => panic!("expected Error, got {:?}", other),
    }

    send(
        &mut client,
        &GatewayCommand::Subscribe {
            target: Target::Directory(b),
        },
    )
    .await;
    match next_event(&mut client).await {
        Some(GatewayEvent::Error { code, .. }) => assert_eq!(code, "INVALID_TARGET"),
        other => panic!("expected Error, got {:?}", other),
    }

    send(
        &mut client,
        &GatewayCommand::Subscribe {
            target: Target::Conversation(c),
        },
    )
    .await;
    assert!(matches!(next_event(&mut client).await, Some(GatewayEvent::Snapshot { .. })));
}

#[tokio::test]
async fn identify_with_a_foreign_token_is_refused() {
    let gw = gateway().await;
    let user = Uuid::new_v4();

    let mut client = connect(gw.addr).await;
    send(
        &mut client,
        &GatewayCommand::Identify {
            token: token(user, "some-other-secret"),
        },
    )
    .await;

    assert_eq!(next_event(&mut client).await, None);
    assert!(!gw.chat.is_online(user));
}

#[tokio::test]
async fn silent_sockets_are_closed_after_the_identify_timeout() {
    let gw = gateway().await;
    let mut client = connect(gw.addr).await;

    // Commands before Identify do not count.
    send(
        &mut client,
        &GatewayCommand::Subscribe {
            target: Target::Directory(Uuid::new_v4()),
        },
    )
    .await;

    assert_eq!(next_event(&mut client).await, None);
}
