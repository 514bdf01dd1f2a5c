//! Tests for configuration

#[cfg(test)]
mod tests {
    use super::super::config::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.poll.interval_secs, 30);
        assert_eq!(config.poll.venue_timeout_secs, 30);
        assert!(config.supabase.is_none());
        assert!(config.openrouter.is_none());
    }

    #[test]
    fn server_section_overrides_port() {
        let config: Config = toml::from_str(
            r#"
[server]
port = 8080
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn poll_section_partial_override() {
        let config: Config = toml::from_str(
            r#"
[poll]
interval_secs = 15
"#,
        )
        .unwrap();
        assert_eq!(config.poll.interval_secs, 15);
        assert_eq!(config.poll.venue_timeout_secs, 30);
    }

    #[test]
    fn supabase_section_with_service_key() {
        let config: Config = toml::from_str(
            r#"
[supabase]
url = "https://example.supabase.co"
service_role_key = "service-key"
"#,
        )
        .unwrap();
        let supabase = config.supabase.unwrap();
        assert_eq!(supabase.url, "https://example.supabase.co");
        assert_eq!(supabase.service_role_key.as_deref(), Some("service-key"));
        assert!(supabase.anon_key.is_none());
    }

    #[test]
    fn openrouter_defaults_base_url() {
        let config: Config = toml::from_str(
            r#"
[openrouter]
api_key = "sk-or-xxx"
"#,
        )
        .unwrap();
        let openrouter = config.openrouter.unwrap();
        assert_eq!(openrouter.api_key, "sk-or-xxx");
        assert_eq!(openrouter.base_url, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn openrouter_base_url_override() {
        let config: Config = toml::from_str(
            r#"
[openrouter]
api_key = "sk-or-xxx"
base_url = "http://localhost:9999/v1"
"#,
        )
        .unwrap();
        assert_eq!(
            config.openrouter.unwrap().base_url,
            "http://localhost:9999/v1"
        );
    }
}
