use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_AGENT_URL: &str = "wss://agent.deepgram.com/v1/agent/converse";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings for the outbound conversational agent connection.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub url: String,
    pub api_key: SecretString,
    pub listen_model: String,
    pub think_model: String,
    pub voice: String,
    pub sample_rate: u32,
    pub handshake_timeout: Duration,
    pub keepalive_interval: Duration,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub agent: AgentConfig,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    pub google_token_file: PathBuf,
    pub google_calendar_id: String,
    pub booking_duration: chrono::Duration,
    pub relay_queue_capacity: usize,
    pub calendar_timeout: Duration,
    pub terminal_grace: Duration,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var_or(name, default);
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{}': {}", raw, e)))
}

fn secs_var(name: &str, default: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_var(name, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be at least 1 second".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address: SocketAddr = parse_var("BIND_ADDRESS", "0.0.0.0:3000")?;

        let api_key = std::env::var("DEEPGRAM_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("DEEPGRAM_API_KEY".to_string()))?;

        let agent = AgentConfig {
            url: var_or("AGENT_URL", DEFAULT_AGENT_URL),
            api_key,
            listen_model: var_or("AGENT_LISTEN_MODEL", "nova-3"),
            think_model: var_or("AGENT_THINK_MODEL", "gpt-4o-mini"),
            voice: var_or("AGENT_VOICE", "aura-2-thalia-en"),
            sample_rate: parse_var("AUDIO_SAMPLE_RATE", "24000")?,
            handshake_timeout: secs_var("HANDSHAKE_TIMEOUT_SECS", "5")?,
            keepalive_interval: secs_var("KEEPALIVE_INTERVAL_SECS", "8")?,
        };

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = PathBuf::from(var_or("PROMPTS_PATH", "./prompts"));
        let google_token_file = PathBuf::from(var_or("GOOGLE_TOKEN_FILE", "./google_tokens.json"));
        let google_calendar_id = var_or("GOOGLE_CALENDAR_ID", "primary");

        let duration_minutes: i64 = parse_var("BOOKING_DURATION_MINUTES", "30")?;
        if !(5..=240).contains(&duration_minutes) {
            return Err(ConfigError::InvalidValue(
                "BOOKING_DURATION_MINUTES".to_string(),
                format!("{} is outside 5..=240", duration_minutes),
            ));
        }

        let relay_queue_capacity: usize = parse_var("RELAY_QUEUE_CAPACITY", "64")?;
        if relay_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_QUEUE_CAPACITY".to_string(),
                "must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            agent,
            log_level,
            prompts_path,
            google_token_file,
            google_calendar_id,
            booking_duration: chrono::Duration::minutes(duration_minutes),
            relay_queue_capacity,
            calendar_timeout: secs_var("CALENDAR_TIMEOUT_SECS", "15")?,
            terminal_grace: secs_var("TERMINAL_GRACE_SECS", "10")?,
        })
    }
}
