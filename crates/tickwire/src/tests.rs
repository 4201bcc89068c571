//! Tests for wire values, message envelopes, and framing.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::frame::read_frame;
use crate::frame::read_message;
use crate::frame::write_message;
use crate::frame::MAX_AUTH_FRAME_LEN;
use crate::frame::MAX_FRAME_LEN;
use crate::message::CallRequest;
use crate::message::Message;
use crate::value::WireValue;
use crate::WireError;

fn roundtrip(value: &WireValue) -> WireValue {
    WireValue::from_json(&value.to_json())
}

#[test]
fn primitives_roundtrip() {
    for value in [
        WireValue::Null,
        WireValue::Bool(true),
        WireValue::Int(-42),
        WireValue::Float(1.5),
        WireValue::str("hello"),
    ] {
        assert_eq!(roundtrip(&value), value);
    }
}

#[test]
fn integers_stay_integers() {
    let json = WireValue::Int(7).to_json();
    assert!(json.is_i64());
    assert_eq!(WireValue::from_json(&json), WireValue::Int(7));
}

#[test]
fn uuid_marker_roundtrip() {
    let value = WireValue::Uuid(Uuid::new_v4());
    let json = value.to_json();
    assert!(json.get("__uuid__").is_some());
    assert_eq!(roundtrip(&value), value);
}

#[test]
fn enum_marker_roundtrip() {
    let value = WireValue::Enum {
        type_name: "GameMode".into(),
        name: "CREATIVE".into(),
    };
    let json = value.to_json();
    assert_eq!(json["__enum__"], "GameMode");
    assert_eq!(json["name"], "CREATIVE");
    assert_eq!(roundtrip(&value), value);
}

#[test]
fn handle_marker_roundtrip() {
    let mut fields = BTreeMap::new();
    fields.insert("name".to_string(), WireValue::str("steve"));
    let value = WireValue::Handle {
        id: 9,
        type_name: Some("Player".into()),
        fields: Some(fields),
    };
    let json = value.to_json();
    assert_eq!(json["__handle__"], 9);
    assert_eq!(json["__type__"], "Player");
    assert_eq!(roundtrip(&value), value);
}

#[test]
fn handle_without_fields_roundtrips() {
    let value = WireValue::Handle {
        id: 3,
        type_name: None,
        fields: None,
    };
    assert_eq!(roundtrip(&value), value);
}

#[test]
fn ref_marker_roundtrip() {
    let value = WireValue::Ref {
        ref_type: "player".into(),
        id: "5f0c-aa".into(),
    };
    let json = value.to_json();
    assert_eq!(json["__ref__"]["type"], "player");
    assert_eq!(roundtrip(&value), value);
}

#[test]
fn value_marker_roundtrip() {
    let mut fields = BTreeMap::new();
    fields.insert("x".to_string(), WireValue::Float(1.0));
    fields.insert("y".to_string(), WireValue::Float(2.0));
    fields.insert("z".to_string(), WireValue::Float(3.0));
    let value = WireValue::Value {
        type_name: "Vector".into(),
        fields,
    };
    let json = value.to_json();
    assert_eq!(json["__value__"], "Vector");
    assert_eq!(roundtrip(&value), value);
}

#[test]
fn plain_map_stays_plain() {
    let json = serde_json::json!({ "hello": "world", "nested": { "a": 1 } });
    let value = WireValue::from_json(&json);
    let WireValue::Map(map) = &value else {
        panic!("expected Map, got {:?}", value);
    };
    assert_eq!(map.get("hello"), Some(&WireValue::str("world")));
    assert_eq!(roundtrip(&value), value);
}

#[test]
fn call_message_roundtrip() {
    let call = CallRequest {
        id: 12,
        handle: Some(4),
        method: "teleport".into(),
        args_list: vec![WireValue::List(vec![
            WireValue::Float(1.0),
            WireValue::Float(64.0),
            WireValue::Float(-3.5),
        ])],
        ..CallRequest::default()
    };
    let encoded = serde_json::to_string(&Message::Call(call)).unwrap();
    let decoded: Message = serde_json::from_str(&encoded).unwrap();
    let Message::Call(call) = decoded else {
        panic!("expected call");
    };
    assert_eq!(call.id, 12);
    assert_eq!(call.handle, Some(4));
    assert_eq!(call.method, "teleport");
    assert_eq!(call.args_list.len(), 1);
}

#[test]
fn wait_defaults_to_one_tick() {
    let decoded: Message = serde_json::from_str(r#"{"type":"wait","id":5}"#).unwrap();
    let Message::Wait { id, ticks } = decoded else {
        panic!("expected wait");
    };
    assert_eq!(id, 5);
    assert_eq!(ticks, 1);
}

#[test]
fn unknown_fields_are_ignored() {
    let decoded: Message =
        serde_json::from_str(r#"{"type":"event_done","id":8,"future_field":true}"#).unwrap();
    assert!(matches!(decoded, Message::EventDone { id: 8 }));
}

#[test]
fn error_message_omits_empty_code() {
    let encoded = serde_json::to_string(&Message::error(3, "boom")).unwrap();
    assert!(!encoded.contains("code"));
    let encoded =
        serde_json::to_string(&Message::error_with_code(3, "boom", "ENTITY_GONE")).unwrap();
    assert!(encoded.contains("ENTITY_GONE"));
}

#[tokio::test]
async fn frame_roundtrip_over_duplex() {
    let (mut a, mut b) = tokio::io::duplex(1024);
    let message = Message::Event {
        event: "player_join".into(),
        payload: WireValue::Map(BTreeMap::new()),
    };
    write_message(&mut a, &message).await.unwrap();
    let decoded = read_message(&mut b, MAX_FRAME_LEN).await.unwrap().unwrap();
    let Message::Event { event, .. } = decoded else {
        panic!("expected event");
    };
    assert_eq!(event, "player_join");
}

#[tokio::test]
async fn clean_eof_returns_none() {
    let (a, mut b) = tokio::io::duplex(64);
    drop(a);
    assert!(read_frame(&mut b, MAX_FRAME_LEN).await.unwrap().is_none());
}

#[tokio::test]
async fn zero_length_frame_is_rejected() {
    let (mut a, mut b) = tokio::io::duplex(64);
    tokio::io::AsyncWriteExt::write_all(&mut a, &0u32.to_be_bytes())
        .await
        .unwrap();
    let err = read_frame(&mut b, MAX_FRAME_LEN).await.unwrap_err();
    assert!(matches!(err, WireError::BadFrameLength(0)));
}

#[tokio::test]
async fn oversized_auth_frame_is_rejected() {
    let (mut a, mut b) = tokio::io::duplex(64);
    tokio::io::AsyncWriteExt::write_all(&mut a, &8192u32.to_be_bytes())
        .await
        .unwrap();
    let err = read_frame(&mut b, MAX_AUTH_FRAME_LEN).await.unwrap_err();
    assert!(matches!(err, WireError::BadFrameLength(8192)));
}

#[tokio::test]
async fn truncated_body_is_an_error() {
    let (mut a, mut b) = tokio::io::duplex(64);
    tokio::io::AsyncWriteExt::write_all(&mut a, &16u32.to_be_bytes())
        .await
        .unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut a, b"short")
        .await
        .unwrap();
    drop(a);
    let err = read_frame(&mut b, MAX_FRAME_LEN).await.unwrap_err();
    assert!(matches!(err, WireError::Truncated));
}
