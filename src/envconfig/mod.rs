use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:5000";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_PORT: u16 = 11434;
pub const DEFAULT_MODEL: &str = "codellama:7b";
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Process-wide settings. Read once at startup, read-only afterwards.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub host: Host,
    pub ollama_url: String,
    pub model: String,
    pub timeout: u64,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub cors_origins: Vec<String>,
    pub supabase: Option<SupabaseConfig>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            host: Host::parse(&env::var("RELAY_HOST").unwrap_or_else(|_| DEFAULT_LISTEN.to_string())),
            ollama_url: normalize_ollama_url(
                &env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string()),
            ),
            model: non_empty_var("RELAY_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: parse_or("OLLAMA_TIMEOUT", DEFAULT_TIMEOUT_SECS),
            upload_dir: non_empty_var("RELAY_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
            max_upload_bytes: parse_or("RELAY_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            cors_origins: parse_list(&env::var("RELAY_CORS_ORIGINS").unwrap_or_default()),
            supabase: match (non_empty_var("SUPABASE_URL"), non_empty_var("SUPABASE_KEY")) {
                (Some(url), Some(key)) => Some(SupabaseConfig { url, key }),
                _ => None,
            },
            log_file: non_empty_var("RELAY_LOG_FILE").map(PathBuf::from),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host.host, self.host.port)
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Host {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.rsplit_once(':') {
            Some((host, port)) => Self {
                host: if host.is_empty() { "127.0.0.1".to_string() } else { host.to_string() },
                port: port.parse().unwrap_or(5000),
            },
            None => Self { host: raw.to_string(), port: 5000 },
        }
    }
}

/// Accepts `host`, `host:port` or a full URL and always yields
/// `scheme://host:port`.
pub fn normalize_ollama_url(raw: &str) -> String {
    let mut host = raw.trim().trim_end_matches('/').to_string();
    if host.is_empty() {
        return DEFAULT_OLLAMA_HOST.to_string();
    }

    if !host.starts_with("http://") && !host.starts_with("https://") {
        host = format!("http://{}", host);
    }

    match url::Url::parse(&host) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            let name = parsed.host_str().unwrap_or("localhost");
            let port = parsed.port().unwrap_or(DEFAULT_OLLAMA_PORT);
            format!("{}://{}:{}", scheme, name, port)
        }
        Err(_) => DEFAULT_OLLAMA_HOST.to_string(),
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    non_empty_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
