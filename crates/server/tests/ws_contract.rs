use chrono::Utc;
use drawbridge_common::protocol::ws::{ClientMessage, FileInfo, PresenceAction, ServerEvent};
use serde_json::Value;

#[test]
fn websocket_contract_server_event_shapes() {
    let file_info = FileInfo {
        original_name: "diagram.png".to_string(),
        secure_name: "aGVsbG8.png".to_string(),
        size: 2048,
        content_type: "image/png".to_string(),
        download_url: "http://localhost:8080/files/aGVsbG8.png".to_string(),
        uploaded_at: Utc::now(),
    };

    let samples = [
        (
            ServerEvent::Presence {
                action: PresenceAction::Joined,
                username: "Alice".to_string(),
                timestamp: Utc::now(),
            },
            "presence",
            &["type", "action", "username", "timestamp"][..],
        ),
        (
            ServerEvent::Chat {
                text: "hello".to_string(),
                username: "Alice".to_string(),
                timestamp: Utc::now(),
            },
            "chat",
            &["type", "text", "username", "timestamp"][..],
        ),
        (
            ServerEvent::ClearCanvas { username: "Alice".to_string() },
            "clear_canvas",
            &["type", "username"][..],
        ),
        (
            ServerEvent::UsersList { users: vec!["Alice".to_string(), "Bob".to_string()] },
            "users_list",
            &["type", "users"][..],
        ),
        (
            ServerEvent::FileShared {
                file_info,
                username: "Alice".to_string(),
                timestamp: Utc::now(),
            },
            "file_shared",
            &["type", "file_info", "username", "timestamp"][..],
        ),
    ];

    for (event, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(event).expect("server event should serialize");
        assert_eq!(value["type"], expected_type);
        let keys = object_keys(&value);
        for key in expected_keys {
            assert!(
                keys.contains(&key.to_string()),
                "serialized `{expected_type}` frame must include `{key}`",
            );
        }
        assert_eq!(
            keys.len(),
            expected_keys.len(),
            "serialized `{expected_type}` frame must carry exactly its contract fields",
        );
    }
}

#[test]
fn websocket_contract_presence_actions_are_snake_case() {
    assert_eq!(serde_json::to_value(PresenceAction::Joined).unwrap(), "joined");
    assert_eq!(serde_json::to_value(PresenceAction::Left).unwrap(), "left");
}

#[test]
fn websocket_contract_file_info_field_set() {
    let info = FileInfo {
        original_name: "notes.txt".to_string(),
        secure_name: "c2VjdXJl.txt".to_string(),
        size: 13,
        content_type: "text/plain".to_string(),
        download_url: "http://localhost:8080/files/c2VjdXJl.txt?expires=1&sig=abc".to_string(),
        uploaded_at: Utc::now(),
    };
    let value = serde_json::to_value(info).expect("file info should serialize");
    assert_eq!(
        object_keys(&value),
        vec![
            "content_type",
            "download_url",
            "original_name",
            "secure_name",
            "size",
            "uploaded_at",
        ],
    );
    assert!(value["uploaded_at"].is_string(), "timestamps must serialize as rfc3339 strings");
}

#[test]
fn websocket_contract_client_messages_parse_leniently() {
    let chat: ClientMessage =
        serde_json::from_str(r#"{"type":"chat","text":"hi","username":"Alice"}"#)
            .expect("chat with username should parse");
    assert_eq!(
        chat,
        ClientMessage::Chat { text: "hi".to_string(), username: Some("Alice".to_string()) },
    );

    let bare: ClientMessage =
        serde_json::from_str(r#"{"type":"chat"}"#).expect("bare chat should parse");
    assert_eq!(bare, ClientMessage::Chat { text: String::new(), username: None });

    let clear: ClientMessage =
        serde_json::from_str(r#"{"type":"clear"}"#).expect("clear should parse");
    assert_eq!(clear, ClientMessage::Clear);

    assert!(
        serde_json::from_str::<ClientMessage>(r#"{"type":"draw","points":[1,2]}"#).is_err(),
        "unrecognized types must fail to parse so the router can ignore them",
    );
}

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}
