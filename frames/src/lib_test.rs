use super::*;

fn sample_frame() -> Frame {
    Frame {
        id: "id-1".to_owned(),
        parent_id: Some("parent-1".to_owned()),
        ts: 42,
        container_id: Some("c-1".to_owned()),
        from: Some("client-1".to_owned()),
        syscall: "map:set".to_owned(),
        status: Status::Done,
        data: serde_json::json!({
            "key": "position_n1",
            "value": {"x": 1.25, "y": -3.5},
            "ok": true,
            "tags": ["a", "b"],
            "nil": null
        }),
    }
}

#[test]
fn status_numeric_mapping_matches_wire_enum() {
    assert_eq!(Status::Request.as_i32(), 0);
    assert_eq!(Status::Done.as_i32(), 1);
    assert_eq!(Status::Error.as_i32(), 2);
}

#[test]
fn status_from_wire_rejects_out_of_range_value() {
    let err = Status::from_i32(99).expect_err("status should be invalid");
    assert!(matches!(err, CodecError::InvalidStatus(99)));
}

#[test]
fn terminal_statuses() {
    assert!(Status::Done.is_terminal());
    assert!(Status::Error.is_terminal());
    assert!(!Status::Request.is_terminal());
}

#[test]
fn encode_decode_preserves_frame() {
    let frame = sample_frame();
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode should succeed");
    assert_eq!(decoded, frame);
}

#[test]
fn decode_frame_rejects_malformed_bytes() {
    let err = decode_frame(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_frame_rejects_invalid_wire_status() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        container_id: None,
        from: None,
        syscall: "map:set".to_owned(),
        status: 77,
        data: None,
        data_json: "{}".to_owned(),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let err = decode_frame(&bytes).expect_err("status should fail");
    assert!(matches!(err, CodecError::InvalidStatus(77)));
}

#[test]
fn decode_frame_defaults_missing_data_to_empty_object() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        container_id: None,
        from: None,
        syscall: "container:create".to_owned(),
        status: Status::Request.as_i32(),
        data: None,
        data_json: String::new(),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, serde_json::json!({}));
}

#[test]
fn decode_frame_converts_nan_number_to_json_null() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        container_id: None,
        from: None,
        syscall: "map:set".to_owned(),
        status: Status::Request.as_i32(),
        data: Some(prost_types::Value {
            kind: Some(prost_types::value::Kind::NumberValue(f64::NAN)),
        }),
        data_json: String::new(),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, Value::Null);
}

#[test]
fn numbers_keep_their_exact_representation() {
    let data = serde_json::json!({
        "key": "big",
        "value": 9_007_199_254_740_993_u64,
        "pos": {"x": 1.0, "y": 2.5},
        "neg": -9_007_199_254_740_993_i64
    });
    let frame = Frame { data: data.clone(), ..sample_frame() };

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded.data, data);
    assert_eq!(decoded.field("value").and_then(Value::as_u64), Some(9_007_199_254_740_993));
    let x = decoded.data.pointer("/pos/x").expect("x");
    assert!(x.is_f64(), "1.0 stays a float");
}

#[test]
fn structured_payload_is_still_decoded() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        container_id: None,
        from: None,
        syscall: "map:set".to_owned(),
        status: Status::Request.as_i32(),
        data: Some(prost_types::Value {
            kind: Some(prost_types::value::Kind::StructValue(prost_types::Struct {
                fields: [(
                    "seq".to_owned(),
                    prost_types::Value { kind: Some(prost_types::value::Kind::NumberValue(3.0)) },
                )]
                .into_iter()
                .collect(),
            })),
        }),
        data_json: String::new(),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, serde_json::json!({"seq": 3}));
}

#[test]
fn decode_frame_rejects_malformed_json_payload() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        container_id: None,
        from: None,
        syscall: "map:set".to_owned(),
        status: Status::Request.as_i32(),
        data: None,
        data_json: "{not json".to_owned(),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let err = decode_frame(&bytes).expect_err("payload should fail");
    assert!(matches!(err, CodecError::InvalidData(_)));
}

#[test]
fn integral_numbers_come_back_as_integers() {
    let frame = Frame::request("map:set", Map::new())
        .with_data("seq", 7)
        .with_data("value", 4);

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded.field("seq").and_then(Value::as_u64), Some(7));
    assert_eq!(decoded.field("value"), Some(&serde_json::json!(4)));
}

#[test]
fn request_sets_fields() {
    let frame = Frame::request("container:create", Map::new());
    assert_eq!(frame.syscall, "container:create");
    assert_eq!(frame.status, Status::Request);
    assert!(frame.parent_id.is_none());
    assert!(frame.container_id.is_none());
    assert!(frame.ts > 0);
    assert_eq!(frame.data, serde_json::json!({}));
}

#[test]
fn reply_inherits_context() {
    let req = Frame::request("map:set", Map::new()).with_container_id("c-9");
    let done = req.done();

    assert_eq!(done.parent_id.as_deref(), Some(req.id.as_str()));
    assert_eq!(done.container_id.as_deref(), Some("c-9"));
    assert_eq!(done.syscall, "map:set");
    assert_eq!(done.status, Status::Done);
}

#[test]
fn prefix_and_op_extraction() {
    let frame = Frame::request("presence:update", Map::new());
    assert_eq!(frame.prefix(), "presence");
    assert_eq!(frame.op(), "update");

    let frame = Frame::request("noseparator", Map::new());
    assert_eq!(frame.prefix(), "noseparator");
    assert_eq!(frame.op(), "");
}

#[test]
fn error_from_typed() {
    #[derive(Debug, thiserror::Error)]
    #[error("container not found")]
    struct NotFound;

    impl ErrorCode for NotFound {
        fn error_code(&self) -> &'static str {
            "E_CONTAINER_NOT_FOUND"
        }
    }

    let req = Frame::request("container:attach", Map::new());
    let err = req.error_from(&NotFound);

    assert_eq!(err.status, Status::Error);
    assert_eq!(err.str_field(FRAME_CODE), Some("E_CONTAINER_NOT_FOUND"));
    assert_eq!(err.error_message(), Some("container not found"));
    assert_eq!(err.field(FRAME_RETRYABLE).and_then(Value::as_bool), Some(false));
}

#[test]
fn with_data_replaces_non_object_payload() {
    let mut frame = Frame::request("map:set", Map::new());
    frame.data = Value::Null;
    let frame = frame.with_data("key", "k");
    assert_eq!(frame.str_field("key"), Some("k"));
}
