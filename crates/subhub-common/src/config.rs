use serde::Deserialize;

/// Cross-node subscription mode for the PubSub Bus.
///
/// `Normal` issues a `SUBSCRIBE`/`UNSUBSCRIBE` per topic as local interest
/// rises and falls to zero. `Firehose` issues a single `PSUBSCRIBE *` up
/// front and lets the Subscription Index do all the filtering locally —
/// useful for small deployments where the extra Redis traffic is cheaper
/// than the bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PubSubMode {
    Normal,
    Firehose,
}

impl Default for PubSubMode {
    fn default() -> Self {
        Self::Normal
    }
}

/// Top-level application configuration.
///
/// Loaded from environment variables (prefix `SUBHUB__`, `__`-separated
/// nesting) layered over whatever defaults the CLI flags already
/// resolved to — see `subhub-server`'s `cli` module for the flag
/// surface this mirrors.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub pubsub: PubSubConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// `host:port` the HTTP/WebSocket listener binds to.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    /// Log level (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Write endpoint — publishes, presence roster writes, app settings.
    #[serde(default = "default_redis_url")]
    pub master_url: String,
    /// Read endpoint — object-channel read-through, presence roster reads.
    /// Falls back to `master_url` when not set separately.
    #[serde(default)]
    pub slave_url: Option<String>,
}

impl RedisConfig {
    pub fn slave_url(&self) -> &str {
        self.slave_url.as_deref().unwrap_or(&self.master_url)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    /// Redis endpoint used for the publish side of the bus.
    #[serde(default = "default_redis_url")]
    pub pub_url: String,
    /// Redis endpoint used for the subscribe side of the bus.
    #[serde(default = "default_redis_url")]
    pub sub_url: String,
    #[serde(default)]
    pub mode: PubSubMode,
    /// This node's id, compared against `Message::node_id` to suppress
    /// re-delivering a message the bus itself just published.
    #[serde(default = "default_node_id")]
    pub node_id: String,
}

impl AppConfig {
    /// Load config from environment variables, layered over `defaults`
    /// (the already-resolved CLI flag values).
    pub fn load(defaults: AppConfig) -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .set_default("server.http_addr", defaults.server.http_addr)?
            .set_default("server.log_level", defaults.server.log_level)?
            .set_default("redis.master_url", defaults.redis.master_url)?
            .set_default(
                "redis.slave_url",
                defaults.redis.slave_url.unwrap_or_default(),
            )?
            .set_default("pubsub.pub_url", defaults.pubsub.pub_url)?
            .set_default("pubsub.sub_url", defaults.pubsub.sub_url)?
            .set_default(
                "pubsub.mode",
                match defaults.pubsub.mode {
                    PubSubMode::Normal => "normal",
                    PubSubMode::Firehose => "firehose",
                },
            )?
            .set_default("pubsub.node_id", defaults.pubsub.node_id)?
            .add_source(
                config::Environment::default()
                    .prefix("SUBHUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut parsed: AppConfig = cfg.try_deserialize()?;
        if parsed
            .redis
            .slave_url
            .as_deref()
            .is_some_and(str::is_empty)
        {
            parsed.redis.slave_url = None;
        }
        Ok(parsed)
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8081".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
/// Last-resort fallback when neither `--psid` nor `SUBHUB__PUBSUB__NODE_ID`
/// supplied one; `subhub-server`'s CLI layer normally generates a real
/// random id before this default is ever consulted.
fn default_node_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("node-{:x}-{:x}", std::process::id(), nanos)
}
