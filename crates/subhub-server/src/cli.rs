//! Command-line flags, mirroring the original implementation's flag
//! surface. Parsed values seed [`subhub_common::config::AppConfig`] as
//! defaults that the `SUBHUB__`-prefixed environment layer can still
//! override.

use clap::Parser;
use subhub_common::config::{AppConfig, PubSubConfig, PubSubMode, RedisConfig, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "subhub-server", about = "Pusher-compatible realtime messaging hub")]
pub struct Cli {
    /// WebSocket/HTTP bind address.
    #[arg(long, default_value = "0.0.0.0:8081", env = "SUBHUB_HTTP")]
    pub http: String,

    /// Redis master (write) endpoint.
    #[arg(long, default_value = "redis://127.0.0.1:6379", env = "SUBHUB_MASTER")]
    pub master: String,

    /// Redis slave (read) endpoint; defaults to `master` when unset.
    #[arg(long, env = "SUBHUB_SLAVE")]
    pub slave: Option<String>,

    /// Redis endpoint used for the bus's publish connection.
    #[arg(long, env = "SUBHUB_PUB")]
    pub pub_url: Option<String>,

    /// Redis endpoint used for the bus's subscribe connection.
    #[arg(long, env = "SUBHUB_SUB")]
    pub sub_url: Option<String>,

    /// PubSub mode: 1 = normal (per-topic subscribe), 2 = firehose (psubscribe *).
    #[arg(long, default_value_t = 1, env = "SUBHUB_PSMODE")]
    pub psmode: u8,

    /// This node's id; a random one is generated if left empty.
    #[arg(long, default_value = "", env = "SUBHUB_PSID")]
    pub psid: String,

    /// Lower the log level to debug.
    #[arg(long, env = "SUBHUB_DEBUG")]
    pub debug: bool,
}

impl Cli {
    pub fn into_defaults(self) -> AppConfig {
        let node_id = if self.psid.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            self.psid
        };
        let mode = match self.psmode {
            2 => PubSubMode::Firehose,
            _ => PubSubMode::Normal,
        };
        let pub_url = self.pub_url.unwrap_or_else(|| self.master.clone());
        let sub_url = self.sub_url.unwrap_or_else(|| self.master.clone());

        AppConfig {
            server: ServerConfig {
                http_addr: self.http,
                log_level: if self.debug { "debug".to_string() } else { "info".to_string() },
            },
            redis: RedisConfig {
                master_url: self.master,
                slave_url: self.slave,
            },
            pubsub: PubSubConfig {
                pub_url,
                sub_url,
                mode,
                node_id,
            },
        }
    }
}
