use pixel_ingest::{config::Config, transform::TransformSpec};

#[test]
fn parse_example_config() {
    let raw = include_str!("../pixel-ingest.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.global.label, "cats");
    assert!(cfg.global.max_concurrency >= 1);
    assert_eq!(cfg.status.terminator, "\n");
    assert_eq!(cfg.manifest.resolve_source("cats"), "manifests/cats.txt");
    TransformSpec::from_config(&cfg.transform).expect("transform section");
}

#[test]
fn partial_config_uses_defaults() {
    let cfg: Config = toml::from_str("[status]\nport = 7000\n").expect("parse TOML");
    assert_eq!(cfg.status.port, 7000);
    assert_eq!(cfg.status.max_retries, 3);
    assert_eq!(cfg.transform.width, 200);
    assert_eq!(cfg.fetch.timeout_seconds, 5);
}
