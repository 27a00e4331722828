#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use commlink_client::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
identity:
  address: "0xabc"
comms:
  conection_string: "offline:offline" # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONSTRUCTION");
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
identity:
  address: "0xabc"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.comms.connection_string, "offline:offline");
    assert_eq!(cfg.comms.comm_radius, 5);
    assert_eq!(cfg.comms.profile_response_min_ms, 1000);
    assert_eq!(cfg.profile.version, -1);
    assert!(cfg.ops.enabled);
}

#[test]
fn identity_is_required() {
    let err = config::load_from_str("version: 1\n").expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONSTRUCTION");
}

#[test]
fn rejects_out_of_range_values() {
    for comms in [
        "comm_radius: 0",
        "comm_radius: 17",
        "position_heartbeat_ms: 0",
        "position_min_interval_ms: 2000",
        "connection_string: \"offline\"",
    ] {
        let yaml = format!("version: 1\nidentity:\n  address: \"0xabc\"\ncomms:\n  {comms}\n");
        assert!(config::load_from_str(&yaml).is_err(), "{comms} must fail");
    }
}

#[test]
fn rejects_unknown_version() {
    let err = config::load_from_str("version: 2\nidentity:\n  address: \"0xabc\"\n")
        .expect_err("must fail");
    assert!(err.to_string().contains("version 2"));
}

#[test]
fn profile_section_builds_guest_with_overrides() {
    let cfg = config::load_from_str(
        r#"
version: 1
identity:
  address: "0xabc"
  has_connected_web3: true
profile:
  name: "walker"
  version: 3
"#,
    )
    .unwrap();
    let profile = cfg.profile.to_profile(&cfg.identity.address);
    assert_eq!(profile.name, "walker");
    assert_eq!(profile.version, 3);
    assert_eq!(profile.user_id, "0xabc");
    assert!(cfg.identity.to_identity().has_connected_web3);
}

#[test]
fn shipped_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../commlink.yaml");
    let cfg = config::load_from_file(path).expect("commlink.yaml must load");
    assert!(cfg.comms.connection_string.starts_with("simulator:"));
}
