use anyhow::Result;
use serde::Deserialize;
use anyhow::anyhow;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Empty means bind on every interface.
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: String::new(), port: default_port(), worker_threads: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_file_path")]
    pub file_path: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a mutation waits for room in a full persistence queue.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_path: default_file_path(),
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
        }
    }
}

fn default_port() -> u16 { 8080 }
fn default_file_path() -> String { "cache.json".into() }
fn default_queue_capacity() -> usize { 100 }
fn default_enqueue_timeout_ms() -> u64 { 1000 }

pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl AppConfig {
    /// Defaults, then `config.toml` if present, then environment overrides.
    pub fn load_and_validate() -> Result<Self> {
        let mut cfg = match load_default() {
            Ok(cfg) => cfg,
            Err(e) if is_missing_file(&e) => AppConfig::default(),
            Err(e) => return Err(e),
        };
        cfg.apply_env(|name| std::env::var(name).ok())?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    /// Overlay `HOST`, `PORT`, `CACHE_FILE`, `PERSIST_QUEUE_CAPACITY`,
    /// `PERSIST_ENQUEUE_TIMEOUT_MS` and `TOKIO_WORKER_THREADS`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("PORT").filter(|p| !p.trim().is_empty()) {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("PORT must be an integer in 1..=65535, got {port:?}"))?;
        }
        if let Some(threads) = var("TOKIO_WORKER_THREADS").and_then(|v| v.trim().parse().ok()) {
            self.server.worker_threads = Some(threads);
        }
        if let Some(path) = var("CACHE_FILE").filter(|p| !p.trim().is_empty()) {
            self.cache.file_path = path;
        }
        if let Some(cap) = var("PERSIST_QUEUE_CAPACITY") {
            self.cache.queue_capacity = cap
                .trim()
                .parse()
                .map_err(|_| anyhow!("PERSIST_QUEUE_CAPACITY must be an integer, got {cap:?}"))?;
        }
        if let Some(ms) = var("PERSIST_ENQUEUE_TIMEOUT_MS") {
            self.cache.enqueue_timeout_ms = ms
                .trim()
                .parse()
                .map_err(|_| anyhow!("PERSIST_ENQUEUE_TIMEOUT_MS must be an integer, got {ms:?}"))?;
        }
        Ok(())
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.server.normalize()?;
        self.cache.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        self.host = self.host.trim().to_string();
        if self.port == 0 {
            return Err(anyhow!("server.port must be in 1..=65535"));
        }
        if self.worker_threads == Some(0) {
            self.worker_threads = None;
        }
        Ok(())
    }

    /// Host to listen on: a name, an IPv4 or an IPv6 literal. Empty widens to
    /// `0.0.0.0`; brackets around an IPv6 literal are stripped.
    pub fn listen_host(&self) -> &str {
        if self.host.is_empty() {
            return "0.0.0.0";
        }
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }

    /// `host:port` for display, with IPv6 literals bracketed.
    pub fn bind_addr(&self) -> String {
        let host = self.listen_host();
        if host.contains(':') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.file_path.trim().is_empty() {
            return Err(anyhow!("cache.file_path must not be empty"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow!("cache.queue_capacity must be >= 1"));
        }
        Ok(())
    }
}

fn is_missing_file(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>()
        .map(|io| io.kind() == std::io::ErrorKind::NotFound)
        .unwrap_or(false)
}
