use chrono::{TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use sayit_types::events::{EventPayload, GatewayCommand, GatewayEvent};
use sayit_types::models::{DeliveryStatus, Message, Target};

#[test]
fn target_uses_prefixed_string_form() {
    let id = Uuid::parse_str("7b3f0a52-0c3a-4e8e-9c55-2f1f7a0c9b11").unwrap();

    let conversation = Target::Conversation(id);
    let directory = Target::Directory(id);

    assert_eq!(
        serde_json::to_value(conversation).unwrap(),
        json!("conversation:7b3f0a52-0c3a-4e8e-9c55-2f1f7a0c9b11")
    );
    assert_eq!(
        "directory:7b3f0a52-0c3a-4e8e-9c55-2f1f7a0c9b11".parse::<Target>().unwrap(),
        directory
    );
}

#[test]
fn target_rejects_unknown_kind_and_bad_id() {
    assert!("channel:7b3f0a52-0c3a-4e8e-9c55-2f1f7a0c9b11".parse::<Target>().is_err());
    assert!("conversation:not-a-uuid".parse::<Target>().is_err());
    assert!("conversation".parse::<Target>().is_err());
    assert!(serde_json::from_value::<Target>(json!("directory:")).is_err());
}

#[test]
fn delivery_status_is_ordered_and_lowercase() {
    assert!(DeliveryStatus::Sent < DeliveryStatus::Delivered);
    assert!(DeliveryStatus::Delivered < DeliveryStatus::Read);
    assert!(DeliveryStatus::Sent.can_advance_to(DeliveryStatus::Read));
    assert!(!DeliveryStatus::Read.can_advance_to(DeliveryStatus::Delivered));
    assert_eq!(serde_json::to_value(DeliveryStatus::Delivered).unwrap(), json!("delivered"));
    assert_eq!("read".parse::<DeliveryStatus>().unwrap(), DeliveryStatus::Read);
}

#[test]
fn event_frame_is_tagged_with_type_and_kind() {
    let conversation_id = Uuid::new_v4();
    let message = Message {
        conversation_id,
        sequence: 4,
        sender_id: Uuid::new_v4(),
        text: "hi".into(),
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        status: DeliveryStatus::Sent,
    };
    let frame = GatewayEvent::Event {
        target: Target::Conversation(conversation_id),
        payload: EventPayload::MessageAppended { message: message.clone() },
    };

    let value = serde_json::to_value(&frame).unwrap();
    assert_eq!(value["type"], "Event");
    assert_eq!(value["data"]["payload"]["kind"], "message_appended");
    assert_eq!(value["data"]["payload"]["message"]["sequence"], 4);

    let back: GatewayEvent = serde_json::from_value(value.clone()).unwrap();
    assert_eq!(back, frame);
    assert_eq!(value["data"]["target"], format!("conversation:{}", conversation_id));
}

#[test]
fn commands_parse_from_client_json() {
    let id = Uuid::new_v4();
    let raw = json!({
        "type": "Subscribe",
        "data": { "target": format!("directory:{}", id) }
    });
    let cmd: GatewayCommand = serde_json::from_value(raw).unwrap();
    assert_eq!(cmd, GatewayCommand::Subscribe { target: Target::Directory(id) });

    let raw = json!({
        "type": "AckDelivered",
        "data": { "conversation_id": id, "upto_sequence": 12 }
    });
    let cmd: GatewayCommand = serde_json::from_value(raw).unwrap();
    assert_eq!(
        cmd,
        GatewayCommand::AckDelivered { conversation_id: id, upto_sequence: 12 }
    );
}
