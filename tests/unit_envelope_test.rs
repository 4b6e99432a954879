use hostctl::core::bus::{Envelope, RpcException};

#[test]
fn rpc_request_round_trips_through_json() {
    let envelope = Envelope::RpcRequest {
        token: "tok-1".into(),
        method: "registerDCSServer".into(),
        params: serde_json::json!({"host": "node1", "instance": "blue-flag"}),
        from_node: "node1".into(),
    };
    let raw = serde_json::to_string(&envelope).unwrap();
    assert!(raw.contains("\"kind\":\"rpc_request\""));

    let back: Envelope = serde_json::from_str(&raw).unwrap();
    match back {
        Envelope::RpcRequest { token, method, params, from_node } => {
            assert_eq!(token, "tok-1");
            assert_eq!(method, "registerDCSServer");
            assert_eq!(params["host"], "node1");
            assert_eq!(from_node, "node1");
        }
        other => panic!("expected RpcRequest, got {other:?}"),
    }
}

#[test]
fn rpc_reply_with_exception_round_trips() {
    let envelope = Envelope::RpcReply {
        token: "tok-2".into(),
        result: None,
        exception: Some(RpcException {
            class: "HostNotFound".into(),
            message: "no such host: blue-flag".into(),
        }),
    };
    let raw = serde_json::to_string(&envelope).unwrap();
    let back: Envelope = serde_json::from_str(&raw).unwrap();
    match back {
        Envelope::RpcReply { token, result, exception } => {
            assert_eq!(token, "tok-2");
            assert!(result.is_none());
            let exc = exception.unwrap();
            assert_eq!(exc.class, "HostNotFound");
        }
        other => panic!("expected RpcReply, got {other:?}"),
    }
}

#[test]
fn event_envelope_round_trips() {
    let envelope = Envelope::Event {
        name: "player_join".into(),
        payload: serde_json::json!({"ucid": "abc123", "name": "Alice"}),
    };
    let raw = serde_json::to_string(&envelope).unwrap();
    let back: Envelope = serde_json::from_str(&raw).unwrap();
    match back {
        Envelope::Event { name, payload } => {
            assert_eq!(name, "player_join");
            assert_eq!(payload["ucid"], "abc123");
        }
        other => panic!("expected Event, got {other:?}"),
    }
}

#[test]
fn unknown_kind_tag_is_rejected() {
    let raw = r#"{"kind":"not_a_real_kind"}"#;
    let result: Result<Envelope, _> = serde_json::from_str(raw);
    assert!(result.is_err());
}
