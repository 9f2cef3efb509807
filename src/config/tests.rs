use super::*;
use clap::Parser;
use std::path::Path;
use std::time::Duration;

const POSITIONALS: [&str; 5] = [
    "test-app",
    "maude_bridge",
    "cookie",
    "/usr/bin/maude",
    "app@build-01",
];

fn parse_with(extra: &[&str]) -> BridgeConfig {
    let args: Vec<&str> = POSITIONALS.iter().chain(extra).copied().collect();
    BridgeConfig::parse_from(args)
}

#[test]
fn defaults_match_documented_values() {
    let mut cfg = parse_with(&[]);
    cfg.validate().unwrap();
    assert_eq!(cfg.repl_path, Path::new("/usr/bin/maude"));
    assert_eq!(cfg.connect_attempts, 5);
    assert_eq!(cfg.connect_timeout(), Duration::from_millis(5000));
    assert_eq!(cfg.backoff_base(), Duration::from_millis(100));
    assert_eq!(cfg.backoff_max(), Duration::from_millis(2000));
    assert_eq!(cfg.command_timeout(), Duration::from_secs(30));
    assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
    assert_eq!(cfg.max_output_bytes, 65_536);
    assert_eq!(cfg.prompt, "Maude>");
    assert_eq!(cfg.log_format, LogFormat::Text);
    assert!(!cfg.log_content);
}

#[test]
fn local_node_takes_peer_host() {
    let cfg = parse_with(&[]);
    assert_eq!(cfg.local_node().to_string(), "maude_bridge@build-01");
    assert_eq!(cfg.peer_node_name().alive, "app");
}

#[test]
fn local_node_defaults_to_localhost() {
    let cfg = BridgeConfig::parse_from(["test-app", "bridge", "c", "maude", "app"]);
    assert_eq!(cfg.local_node().to_string(), "bridge@localhost");
}

#[test]
fn rejects_node_name_with_host() {
    let mut cfg = BridgeConfig::parse_from(["test-app", "bridge@h", "c", "maude", "app@h"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_empty_cookie() {
    let mut cfg = BridgeConfig::parse_from(["test-app", "bridge", "", "maude", "app@h"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_connect_attempts_out_of_bounds() {
    let mut cfg = parse_with(&["--connect-attempts", "0"]);
    assert!(cfg.validate().is_err());
    let mut cfg = parse_with(&["--connect-attempts", "101"]);
    assert!(cfg.validate().is_err());
    let mut cfg = parse_with(&["--connect-attempts", "100"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_backoff_cap_below_base() {
    let mut cfg = parse_with(&["--backoff-base-ms", "500", "--backoff-max-ms", "400"]);
    assert!(cfg.validate().is_err());
    let mut cfg = parse_with(&["--backoff-base-ms", "500", "--backoff-max-ms", "500"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_poll_interval_out_of_bounds() {
    let mut cfg = parse_with(&["--poll-interval-ms", "9"]);
    assert!(cfg.validate().is_err());
    let mut cfg = parse_with(&["--poll-interval-ms", "60001"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_output_cap_out_of_bounds() {
    let mut cfg = parse_with(&["--max-output-bytes", "1023"]);
    assert!(cfg.validate().is_err());
    let mut cfg = parse_with(&["--max-output-bytes", "1024"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_zero_timeouts() {
    for flag in [
        "--connect-timeout-ms",
        "--command-timeout-ms",
        "--ready-timeout-ms",
        "--backoff-base-ms",
    ] {
        let mut cfg = parse_with(&[flag, "0"]);
        assert!(cfg.validate().is_err(), "{flag} accepted 0");
    }
}

#[test]
fn rejects_empty_prompt_and_bad_filter() {
    let mut cfg = parse_with(&["--prompt", ""]);
    assert!(cfg.validate().is_err());
    let mut cfg = parse_with(&["--log-level", "maude_bridge=notalevel"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn parses_json_log_format() {
    let cfg = parse_with(&["--log-format", "json", "--log-content"]);
    assert_eq!(cfg.log_format, LogFormat::Json);
    assert!(cfg.log_content);
}

#[test]
fn missing_positionals_fail_to_parse() {
    assert!(BridgeConfig::try_parse_from(["test-app", "bridge", "cookie"]).is_err());
}
