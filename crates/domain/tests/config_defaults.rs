use spark_domain::config::SparkConfig;

#[test]
fn default_host_binds_all_interfaces() {
    let config = SparkConfig::default();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 8000);
}

#[test]
fn explicit_host_parses() {
    let toml_str = r#"
[server]
host = "127.0.0.1"
port = 9000
"#;
    let config: SparkConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9000);
}

#[test]
fn behavior_knobs_have_documented_defaults() {
    let config: SparkConfig = toml::from_str("").unwrap();
    assert_eq!(config.spark.max_turns_default, 20);
    assert_eq!(config.spark.wind_down_turns, 3);
    assert_eq!(config.spark.min_turns_before_winddown, 5);
    assert_eq!(config.spark.context_turns, 8);
    assert_eq!(config.spark.rate_limit_rpm, 30);
    assert_eq!(config.spark.max_doc_chunks, 5);
    assert!((config.spark.doc_match_threshold - 0.3).abs() < f32::EPSILON);
    assert_eq!(config.spark.session_timeout_minutes, 30);
    assert_eq!(config.llm.embedding_dimensions, 2000);
}
