//! Envelope decoding vector tests.

use std::fs;

use eventsocket_core::protocol::{decode_envelope, encode_envelope, MessageType};

use vector_loader::TestVector;

fn load(name: &str) -> TestVector {
    let s = fs::read_to_string(format!("tests/vectors/{name}")).unwrap();
    serde_json::from_str(&s).unwrap()
}

fn opt_str(v: &serde_json::Value, key: &str) -> Option<String> {
    v.get(key).and_then(|s| s.as_str()).map(str::to_string)
}

#[test]
fn envelope_vectors() {
    let files = [
        "broadcast.json",
        "standard.json",
        "request.json",
        "reply.json",
        "subscribe.json",
        "unknown_fields.json",
        "bad_json.json",
        "bad_type.json",
        "reply_missing_request_id.json",
        "standard_missing_event.json",
        "not_utf8.json",
    ];

    for f in files {
        let v = load(f);
        let raw = v.frame.decode();
        let res = decode_envelope(&raw);

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.code().as_str(), err.code, "vector={}", v.description);
            continue;
        }

        let env = res.expect("expected ok envelope");
        let ex = v.expect.expect("missing expect block");

        assert_eq!(
            u8::from(env.message_type) as u64,
            ex["type"].as_u64().unwrap(),
            "vector={}",
            v.description
        );
        assert_eq!(env.event, opt_str(&ex, "event"), "vector={}", v.description);
        assert_eq!(env.request_id, opt_str(&ex, "request_id"), "vector={}", v.description);
        assert_eq!(
            env.payload.len() as u64,
            ex["payload_len"].as_u64().unwrap(),
            "vector={}",
            v.description
        );

        // decoded envelopes re-encode without losing fields
        let again = decode_envelope(encode_envelope(&env).unwrap().as_bytes()).unwrap();
        assert_eq!(again, env, "vector={}", v.description);
    }
}

#[test]
fn subscribe_vector_lists_all_topics() {
    let v = load("subscribe.json");
    let env = decode_envelope(&v.frame.decode()).unwrap();
    assert_eq!(env.message_type, MessageType::Subscribe);
    assert_eq!(env.topics(), vec!["alerts".to_string(), "metrics".to_string()]);
}
