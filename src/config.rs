use std::path::PathBuf;
use std::str::FromStr;

/// Request-handling strategy for the admin chat endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Call the remote messages API directly with streaming enabled.
    Simple,
    /// Spawn the local agent CLI and relay its stream-json output.
    ClaudeCode,
    /// Proxy the request to a remote companion `/chat` endpoint verbatim.
    Server,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Simple => "simple",
            Mode::ClaudeCode => "claude-code",
            Mode::Server => "server",
        }
    }
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Mode::Simple),
            "claude-code" => Ok(Mode::ClaudeCode),
            "server" => Ok(Mode::Server),
            _ => Err(()),
        }
    }
}

/// How the agent subprocess's output reaches the relay.
///
/// `Pipe` reads stdout directly and has the lowest latency; it is the default
/// on every platform. `TempFile` redirects stdout to a temp file and polls
/// it, which is only needed where the agent binary detects a non-interactive
/// pipe and suppresses its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnStrategy {
    Pipe,
    TempFile,
}

impl SpawnStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpawnStrategy::Pipe => "pipe",
            SpawnStrategy::TempFile => "temp-file",
        }
    }
}

/// Server configuration loaded from environment variables, with the port and
/// project directory overridable from the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub project_dir: PathBuf,
    pub environment: String,
    pub sentry_dsn: Option<String>,
    pub mode: Mode,
    pub model: String,
    pub max_turns: u32,
    pub spawn_strategy: SpawnStrategy,
    pub api_url: String,
    pub api_key: Option<String>,
    pub server_url: Option<String>,
}

const DEFAULT_PORT: u16 = 3100;
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TURNS: u32 = 10;
const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a Config through a key lookup closure (as env vars would
    /// resolve). Used directly in tests to avoid mutating process-global
    /// environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| get(key).filter(|v| !v.is_empty());

        let port = non_empty("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let project_dir = non_empty("PAAUTIN_PROJECT")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let environment = non_empty("ENVIRONMENT").unwrap_or_else(|| "local".to_string());

        let mode = match non_empty("PAAUTIN_MODE") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(mode = %raw, "unknown PAAUTIN_MODE, falling back to claude-code");
                Mode::ClaudeCode
            }),
            None => Mode::ClaudeCode,
        };

        let spawn_strategy = match non_empty("PAAUTIN_SPAWN").as_deref() {
            Some("temp-file") => SpawnStrategy::TempFile,
            Some("pipe") | None => SpawnStrategy::Pipe,
            Some(other) => {
                tracing::warn!(strategy = other, "unknown PAAUTIN_SPAWN, using pipe");
                SpawnStrategy::Pipe
            }
        };

        Config {
            port,
            project_dir,
            environment,
            sentry_dsn: non_empty("SENTRY_DSN"),
            mode,
            model: non_empty("PAAUTIN_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_turns: non_empty("PAAUTIN_MAX_TURNS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_TURNS),
            spawn_strategy,
            api_url: non_empty("PAAUTIN_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: non_empty("ANTHROPIC_API_KEY"),
            server_url: non_empty("PAAUTIN_SERVER_URL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.port, 3100);
        assert_eq!(config.environment, "local");
        assert_eq!(config.mode, Mode::ClaudeCode);
        assert_eq!(config.model, "claude-sonnet-4-5");
        assert_eq!(config.max_turns, 10);
        assert_eq!(config.spawn_strategy, SpawnStrategy::Pipe);
        assert!(config.api_key.is_none());
        assert!(config.server_url.is_none());
        assert!(config.sentry_dsn.is_none());
    }

    #[test]
    fn test_invalid_port_uses_default() {
        let config = config_from(&[("PORT", "not-a-number")]);
        assert_eq!(config.port, 3100);
    }

    #[test]
    fn test_valid_port() {
        let config = config_from(&[("PORT", "8090")]);
        assert_eq!(config.port, 8090);
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let config = config_from(&[("SENTRY_DSN", ""), ("ANTHROPIC_API_KEY", "")]);
        assert!(config.sentry_dsn.is_none());
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(config_from(&[("PAAUTIN_MODE", "simple")]).mode, Mode::Simple);
        assert_eq!(
            config_from(&[("PAAUTIN_MODE", "server")]).mode,
            Mode::Server
        );
        assert_eq!(
            config_from(&[("PAAUTIN_MODE", "claude-code")]).mode,
            Mode::ClaudeCode
        );
    }

    #[test]
    fn test_unknown_mode_falls_back() {
        let config = config_from(&[("PAAUTIN_MODE", "quantum")]);
        assert_eq!(config.mode, Mode::ClaudeCode);
    }

    #[test]
    fn test_spawn_strategy_parsing() {
        assert_eq!(
            config_from(&[("PAAUTIN_SPAWN", "temp-file")]).spawn_strategy,
            SpawnStrategy::TempFile
        );
        assert_eq!(
            config_from(&[("PAAUTIN_SPAWN", "bogus")]).spawn_strategy,
            SpawnStrategy::Pipe
        );
    }

    #[test]
    fn test_project_dir_override() {
        let config = config_from(&[("PAAUTIN_PROJECT", "/tmp/flows")]);
        assert_eq!(config.project_dir, PathBuf::from("/tmp/flows"));
    }

    #[test]
    fn test_mode_round_trip() {
        for mode in [Mode::Simple, Mode::ClaudeCode, Mode::Server] {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
    }
}
