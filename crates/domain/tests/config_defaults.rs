use pr_domain::config::Config;

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 3210);
}

#[test]
fn empty_file_matches_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.agent.endpoint(), Config::default().agent.endpoint());
    assert_eq!(config.analytics.max_text_chars, 4000);
    assert!(!config.store.in_memory);
    assert!(config.store.retention_days.is_none());
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://localhost:*".to_string()));
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn cors_wildcard_port_preserved_in_config() {
    let toml_str = r#"
[server.cors]
allowed_origins = ["http://localhost:*", "https://portfolio.example"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.cors.allowed_origins[0], "http://localhost:*");
    assert_eq!(config.server.cors.allowed_origins.len(), 2);
}

#[test]
fn full_file_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8080

[server.rate_limit]
requests_per_second = 2
burst_size = 10

[agent]
base_url = "https://agents.example.com/v1"
model = "openai/gpt-oss-120b"
system_prompt = "Answer as the site owner."

[store]
state_path = "/var/lib/persona-relay"
retention_days = 30

[analytics]
max_text_chars = 2000
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.agent.endpoint(), "https://agents.example.com/v1/agent");
    assert_eq!(config.store.retention_days, Some(30));
    assert_eq!(config.analytics.max_text_chars, 2000);
    assert!(config.validate().is_empty());
}

#[test]
fn admin_token_env_default() {
    let config = Config::default();
    assert_eq!(config.admin.token_env, "PR_ADMIN_TOKEN");
}

#[test]
fn zero_rate_limit_is_rejected() {
    let toml_str = r#"
[server.rate_limit]
requests_per_second = 0
burst_size = 5
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config
        .validate()
        .iter()
        .any(|i| i.field == "server.rate_limit"));
}
