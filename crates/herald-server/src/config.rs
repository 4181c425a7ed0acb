//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `HERALD_HOST` / `PORT`
    /// Default: `0.0.0.0:8005`
    pub addr: SocketAddr,

    /// Shared secret for signing bearer tokens.
    /// Env: `JWT_SECRET`
    pub jwt_secret: String,

    /// Token lifetime. Env: `JWT_EXPIRES_IN` (`3600`, `30m`, `12h`, `1d`)
    /// Default: one day
    pub token_ttl: chrono::Duration,

    /// Env: `HERALD_DB_PATH`
    /// Default: `herald.db`
    pub db_path: PathBuf,

    /// Allowed CORS origin.
    /// Env: `FRONTEND_URL`
    /// Default: `http://localhost:3000`
    pub frontend_url: String,

    /// Base URL of the messaging bridge sidecar.
    /// Env: `BRIDGE_URL`
    /// Default: `http://127.0.0.1:3100`
    pub bridge_url: String,

    /// Directory where the bridge keeps the logged-in browser session.
    /// Env: `WHATSAPP_SESSION_PATH`
    pub session_path: String,

    /// Built SPA to serve for non-API paths.
    /// Env: `HERALD_STATIC_DIR`
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 8005).into(),
            jwt_secret: "dev-secret-change-me".to_string(),
            token_ttl: chrono::Duration::days(1),
            db_path: PathBuf::from("herald.db"),
            frontend_url: "http://localhost:3000".to_string(),
            bridge_url: "http://127.0.0.1:3100".to_string(),
            session_path: "./whatsapp-sessions".to_string(),
            static_dir: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let host = var("HERALD_HOST").unwrap_or_else(|| config.addr.ip().to_string());
        let port = var("PORT").unwrap_or_else(|| config.addr.port().to_string());
        match format!("{}:{}", host, port).parse::<SocketAddr>() {
            Ok(addr) => config.addr = addr,
            Err(e) => warn!(
                "Invalid HERALD_HOST/PORT '{}:{}' ({}), using {}",
                host, port, e, config.addr
            ),
        }

        if let Some(secret) = var("JWT_SECRET") {
            config.jwt_secret = secret;
        } else {
            warn!("JWT_SECRET not set, using the development secret");
        }

        if let Some(raw) = var("JWT_EXPIRES_IN") {
            match parse_ttl(&raw) {
                Some(ttl) => config.token_ttl = ttl,
                None => warn!("Invalid JWT_EXPIRES_IN '{}', using one day", raw),
            }
        }

        if let Some(path) = var("HERALD_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(url) = var("FRONTEND_URL") {
            config.frontend_url = url;
        }
        if let Some(url) = var("BRIDGE_URL") {
            config.bridge_url = url;
        }
        if let Some(path) = var("WHATSAPP_SESSION_PATH") {
            config.session_path = path;
        }
        config.static_dir = var("HERALD_STATIC_DIR")
            .filter(|d| !d.is_empty())
            .map(PathBuf::from);

        config
    }
}

/// Parse a token lifetime: bare seconds or a number with an `s`, `m`, `h` or `d` suffix.
pub fn parse_ttl(raw: &str) -> Option<chrono::Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().last()? {
        (i, c) if c.is_ascii_alphabetic() => (&raw[..i], c),
        _ => (raw, 's'),
    };
    let n: i64 = digits.trim().parse().ok().filter(|n| *n > 0)?;
    match unit {
        's' => chrono::Duration::try_seconds(n),
        'm' => chrono::Duration::try_minutes(n),
        'h' => chrono::Duration::try_hours(n),
        'd' => chrono::Duration::try_days(n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_with(vars: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn ttl_units() {
        assert_eq!(parse_ttl("3600"), Some(chrono::Duration::hours(1)));
        assert_eq!(parse_ttl("30m"), Some(chrono::Duration::minutes(30)));
        assert_eq!(parse_ttl("12h"), Some(chrono::Duration::hours(12)));
        assert_eq!(parse_ttl("1d"), Some(chrono::Duration::days(1)));
        assert_eq!(parse_ttl("1w"), None);
        assert_eq!(parse_ttl("-5"), None);
        assert_eq!(parse_ttl(""), None);
        assert_eq!(parse_ttl("d"), None);
    }

    #[test]
    fn defaults_without_env() {
        let config = config_with(&[]);
        assert_eq!(config.addr.port(), 8005);
        assert_eq!(config.token_ttl, chrono::Duration::days(1));
        assert!(config.static_dir.is_none());
    }

    #[test]
    fn env_overrides() {
        let config = config_with(&[
            ("PORT", "9000"),
            ("HERALD_HOST", "127.0.0.1"),
            ("JWT_EXPIRES_IN", "2h"),
            ("BRIDGE_URL", "http://bridge:3100"),
            ("HERALD_STATIC_DIR", "./frontend/build"),
        ]);
        assert_eq!(config.addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.token_ttl, chrono::Duration::hours(2));
        assert_eq!(config.bridge_url, "http://bridge:3100");
        assert_eq!(config.static_dir, Some(PathBuf::from("./frontend/build")));
    }

    #[test]
    fn bad_port_keeps_default() {
        let config = config_with(&[("PORT", "not-a-port")]);
        assert_eq!(config.addr.port(), 8005);
    }
}
