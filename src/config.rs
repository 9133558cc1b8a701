use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

/// Relay gateway for an OAuth-protected content API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "8000")]
    pub port: u16,

    /// OAuth issuer client identifier
    #[arg(long, env = "OAUTH_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth issuer client secret
    #[arg(long, env = "OAUTH_CLIENT_SECRET")]
    pub client_secret: Option<String>,

    /// OAuth issuer token endpoint URL
    #[arg(long, env = "OAUTH_TOKEN_URL")]
    pub token_url: Option<String>,

    /// Upstream API base URL
    #[arg(long, env = "UPSTREAM_API_URL")]
    pub upstream_url: Option<String>,

    /// Shared secret for caller authentication (omit to run in open mode)
    #[arg(short = 'k', long, env = "PROXY_API_KEY")]
    pub api_key: Option<String>,

    /// Comma-separated origin allow-list (omit to allow all origins)
    #[arg(long, env = "ALLOWED_ORIGINS")]
    pub allowed_origins: Option<String>,

    /// Path to the SQLite token store (omit for an in-memory store)
    #[arg(short = 'd', long, env = "TOKEN_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Issuer credentials
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_token_url: String,

    // Upstream API
    pub upstream_api_url: String,

    // Caller authentication; absence runs the gateway in open mode
    pub shared_secret: Option<String>,

    // CORS; absence allows all origins
    pub allowed_origins: Option<Vec<String>>,

    // Token store; absence selects the in-memory store
    pub token_db_file: Option<PathBuf>,

    // Logging
    pub log_level: String,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Self::from_args(args)
    }

    fn from_args(args: CliArgs) -> Result<Self> {
        Ok(Config {
            server_host: args.host,
            server_port: args.port,

            oauth_client_id: args
                .client_id
                .context("OAUTH_CLIENT_ID is required (use --client-id or set OAUTH_CLIENT_ID)")?,

            oauth_client_secret: args.client_secret.context(
                "OAUTH_CLIENT_SECRET is required (use --client-secret or set OAUTH_CLIENT_SECRET)",
            )?,

            oauth_token_url: args
                .token_url
                .context("OAUTH_TOKEN_URL is required (use --token-url or set OAUTH_TOKEN_URL)")?,

            upstream_api_url: args.upstream_url.context(
                "UPSTREAM_API_URL is required (use --upstream-url or set UPSTREAM_API_URL)",
            )?,

            shared_secret: args.api_key,

            allowed_origins: args
                .allowed_origins
                .as_deref()
                .map(parse_origins)
                .filter(|origins| !origins.is_empty()),

            token_db_file: args.db_file.map(|s| expand_tilde(&s)),

            log_level: args.log_level,

            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.http_timeout,
        })
    }
}

/// Split a comma-separated origin allow-list, dropping empty entries
pub fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_args() -> CliArgs {
        CliArgs {
            host: "0.0.0.0".to_string(),
            port: 8000,
            client_id: Some("id-1".to_string()),
            client_secret: Some("secret-1".to_string()),
            token_url: Some("https://issuer.test/oauth2/token".to_string()),
            upstream_url: Some("https://api.test/v4".to_string()),
            api_key: Some("shared".to_string()),
            allowed_origins: Some("https://a.test, *.b.test".to_string()),
            db_file: None,
            log_level: "info".to_string(),
            connect_timeout: 10,
            http_timeout: 30,
        }
    }

    #[test]
    fn test_from_args_complete() {
        let config = Config::from_args(full_args()).unwrap();
        assert_eq!(config.oauth_client_id, "id-1");
        assert_eq!(config.shared_secret.as_deref(), Some("shared"));
        assert_eq!(
            config.allowed_origins,
            Some(vec!["https://a.test".to_string(), "*.b.test".to_string()])
        );
        assert_eq!(config.token_db_file, None);
    }

    #[test]
    fn test_from_args_requires_credentials() {
        let mut args = full_args();
        args.client_id = None;
        assert!(Config::from_args(args).is_err());

        let mut args = full_args();
        args.client_secret = None;
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn test_optional_fields_default_open() {
        let mut args = full_args();
        args.api_key = None;
        args.allowed_origins = None;

        let config = Config::from_args(args).unwrap();
        assert_eq!(config.shared_secret, None);
        assert_eq!(config.allowed_origins, None);
    }

    #[test]
    fn test_blank_origin_list_counts_as_absent() {
        let mut args = full_args();
        args.allowed_origins = Some("  , ,".to_string());

        let config = Config::from_args(args).unwrap();
        assert_eq!(config.allowed_origins, None);
    }

    #[test]
    fn test_parse_origins() {
        assert_eq!(
            parse_origins("https://a.test,https://b.test"),
            vec!["https://a.test", "https://b.test"]
        );
        assert_eq!(parse_origins(" https://a.test , "), vec!["https://a.test"]);
        assert!(parse_origins("").is_empty());
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/tokens.db");
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.to_string_lossy().ends_with("tokens.db"));

        let path = expand_tilde("/absolute/path.db");
        assert_eq!(path, PathBuf::from("/absolute/path.db"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        // Just "~" without slash should not expand
        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }
}
