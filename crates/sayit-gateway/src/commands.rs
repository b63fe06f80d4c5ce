use tracing::debug;
use uuid::Uuid;

use sayit_core::{ChatService, CoreError, EventSender, SubscriptionState};
use sayit_types::events::{GatewayCommand, GatewayEvent};
use sayit_types::models::Target;

/// What a command changed about the connection's subscriptions.
#[derive(Debug, PartialEq, Eq)]
pub enum Applied {
    Subscribed(Target),
    Unsubscribed(Target),
    Done,
}

/// Run one client command against the chat service. Blocking; call from
/// `spawn_blocking`. Snapshots and events for new subscriptions go to `sender`.
pub fn apply(
    chat: &ChatService,
    user_id: Uuid,
    subscriber_id: Uuid,
    sender: &EventSender,
    cmd: GatewayCommand,
) -> Result<Applied, CoreError> {
    match cmd {
        GatewayCommand::Identify { .. } => {
            debug!("{} sent a second Identify, ignoring", user_id);
            Ok(Applied::Done)
        }

        GatewayCommand::Subscribe { target } => {
            match chat.subscribe(user_id, subscriber_id, target, sender.clone())? {
                SubscriptionState::Active => Ok(Applied::Subscribed(target)),
                SubscriptionState::Closed => Ok(Applied::Done),
            }
        }

        GatewayCommand::Unsubscribe { target } => {
            chat.unsubscribe(subscriber_id, target);
            Ok(Applied::Unsubscribed(target))
        }

        GatewayCommand::StartTyping { conversation_id } => {
            chat.set_typing(user_id, conversation_id)?;
            Ok(Applied::Done)
        }

        GatewayCommand::StopTyping { conversation_id } => {
            chat.clear_typing(user_id, conversation_id)?;
            Ok(Applied::Done)
        }

        GatewayCommand::AckDelivered {
            conversation_id,
            upto_sequence,
        } => {
            chat.mark_delivered(user_id, conversation_id, upto_sequence)?;
            Ok(Applied::Done)
        }
    }
}

pub fn error_frame(err: &CoreError) -> GatewayEvent {
    GatewayEvent::Error {
        code: err.code().to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sayit_core::ChatConfig;
    use sayit_db::Database;
    use sayit_types::events::{EventPayload, SnapshotState};
    use sayit_types::models::DeliveryStatus;
    use tokio::sync::mpsc;

    fn chat() -> (tempfile::TempDir, ChatService) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("gateway.db")).unwrap());
        (dir, ChatService::new(db, ChatConfig::default()))
    }

    #[test]
    fn subscribe_command_streams_snapshot_then_events() {
        let (_dir, chat) = chat();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let c = chat.start_conversation(a, &[b]).unwrap().id;
        chat.send_message(a, c, "first").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let target = Target::Conversation(c);
        let applied = apply(&chat, b, Uuid::new_v4(), &tx, GatewayCommand::Subscribe { target }).unwrap();
        assert_eq!(applied, Applied::Subscribed(target));

        chat.send_message(a, c, "second").unwrap();

        match rx.try_recv().unwrap() {
            GatewayEvent::Snapshot {
                state: SnapshotState::Conversation { messages, .. },
                ..
            } => assert_eq!(messages.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            GatewayEvent::Event {
                payload: EventPayload::MessageAppended { .. },
                ..
            }
        ));
    }

    #[test]
    fn ack_delivered_advances_status() {
        let (_dir, chat) = chat();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let c = chat.start_conversation(a, &[b]).unwrap().id;
        chat.send_message(a, c, "hello").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        apply(
            &chat,
            b,
            Uuid::new_v4(),
            &tx,
            GatewayCommand::AckDelivered {
                conversation_id: c,
                upto_sequence: 1,
            },
        )
        .unwrap();

        let messages = chat.get_messages(a, c, 0, 10).unwrap();
        assert_eq!(messages[0].status, DeliveryStatus::Delivered);
    }

    #[test]
    fn rejected_commands_map_to_error_frames() {
        let (_dir, chat) = chat();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = apply(
            &chat,
            a,
            Uuid::new_v4(),
            &tx,
            GatewayCommand::Subscribe {
                target: Target::Directory(b),
            },
        )
        .unwrap_err();
        assert_eq!(
            error_frame(&err),
            GatewayEvent::Error {
                code: "INVALID_TARGET".into(),
                message: "invalid target".into(),
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
