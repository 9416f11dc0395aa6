//! Envelope decode vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;

use bytes::Bytes;

use doommesh_core::identity::Identity;
use doommesh_core::protocol::envelope::{decode_envelope, Envelope};
use doommesh_core::protocol::frame::GameFrame;

mod vector_loader;
use vector_loader::TestVector;

fn load(name: &str) -> TestVector {
    let s = fs::read_to_string(format!("tests/vectors/{name}")).unwrap();
    serde_json::from_str(&s).unwrap()
}

#[test]
fn envelope_vectors() {
    let files = [
        "env_ok.json",
        "env_bad_version.json",
        "env_truncated.json",
        "env_id_overrun.json",
        "env_short_payload.json",
        "env_empty_match.json",
    ];

    for f in files {
        let v = load(f);
        let raw = v.frame.decode();
        let res = decode_envelope(Bytes::from(raw));

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.drop_code().as_str(), err.code, "vector={}", v.description);
            continue;
        }

        let env = res.expect("expected ok envelope");
        let ex = v.expect.expect("missing expect block");

        assert_eq!(env.match_id, ex["match_id"].as_str().unwrap(), "vector={}", v.description);
        assert_eq!(env.slot_id as u64, ex["slot_id"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(env.seq as u64, ex["seq"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(env.payload.len() as u64, ex["payload_len"].as_u64().unwrap(), "vector={}", v.description);

        let frame = env.frame().expect("embedded frame");
        assert_eq!(frame.to as u64, ex["to"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(frame.from as u64, ex["from"].as_u64().unwrap(), "vector={}", v.description);
    }
}

#[test]
fn signed_envelope_survives_the_wire() {
    let secret: [u8; 32] = rand::random();
    let id = Identity::from_secret_bytes(secret);
    let payload = GameFrame::new(0, 4, Bytes::from_static(b"ticcmd")).encode();

    let env = Envelope::sign(&id, "doom-abc-1", 4, 1, payload.clone()).unwrap();
    let back = decode_envelope(env.encode().unwrap()).unwrap();

    assert_eq!(back.match_id, "doom-abc-1");
    assert_eq!(back.slot_id, 4);
    assert_eq!(back.seq, 1);
    assert_eq!(back.payload, payload);
    assert!(back.verify(id.address()));
}
