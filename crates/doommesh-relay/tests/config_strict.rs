#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use doommesh_relay::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
relay:
  listen: "0.0.0.0:7788"
limits:
  roster_cache: 2000 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.drop_code().as_str(), "BAD_REQUEST");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.relay.channel, "tracdoom");
    assert!(!cfg.relay.indexer);
    assert_eq!(cfg.ttl.presence_ms, 12_000);
    assert_eq!(cfg.ttl.match_ms, 120_000);
    assert_eq!(cfg.limits.join_retry_ms, 5000);
}

#[test]
fn wrong_version_is_rejected() {
    let err = config::load_from_str("version: 2\n").expect_err("must fail");
    assert_eq!(err.drop_code().as_str(), "UNSUPPORTED_VERSION");
}

#[test]
fn out_of_range_values_are_rejected() {
    let bad = r#"
version: 1
limits:
  dedup_cap: 64
  dedup_evict: 65
"#;
    assert!(config::load_from_str(bad).is_err());

    let bad = r#"
version: 1
ttl:
  presence_ms: 2000
  sweep_ms: 2000
"#;
    assert!(config::load_from_str(bad).is_err());

    let bad = r#"
version: 1
relay:
  channel: "  "
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn shipped_sample_config_parses() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../doommesh.yaml");
    let cfg = config::load_from_file(path).expect("sample config must parse");
    assert_eq!(cfg.relay.listen, "127.0.0.1:7788");
    assert!(cfg.identity.secret_hex.is_none());
}
