// crates/server/src/config.rs
//! Command-line and environment configuration for the `backdesk` binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::http::HeaderName;
use backdesk_core::config::DEFAULT_MESSAGE_LOG_CAPACITY;
use backdesk_core::{RegistryConfig, SessionConfig, SupervisorConfig};
use clap::Parser;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47900;

/// Header the authenticating proxy puts the user name in.
pub const DEFAULT_USER_HEADER: &str = "x-remote-user";

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn,backdesk_server=info,backdesk_core=info";

#[derive(Parser, Debug, Clone)]
#[command(name = "backdesk", version, about = "Multi-user front end for backup jobs")]
pub struct Args {
    /// Port to listen on. Falls back to `PORT`, then the built-in default.
    #[arg(short, long, env = "BACKDESK_PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "BACKDESK_BIND", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub bind: IpAddr,

    /// Request header carrying the authenticated user.
    #[arg(long, env = "BACKDESK_USER_HEADER", default_value = DEFAULT_USER_HEADER)]
    pub user_header: String,

    /// Informational messages kept per session.
    #[arg(long, env = "BACKDESK_LOG_CAPACITY", default_value_t = DEFAULT_MESSAGE_LOG_CAPACITY)]
    pub log_capacity: usize,

    /// Skip the result page after a job succeeds.
    #[arg(long, env = "BACKDESK_AUTO_HIDE")]
    pub auto_hide: bool,

    /// Also skip it when the job was stopped.
    #[arg(long, env = "BACKDESK_AUTO_HIDE_AFTER_STOP")]
    pub auto_hide_after_stop: bool,
}

impl Args {
    pub fn port(&self) -> u16 {
        self.port
            .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port())
    }

    pub fn user_header_name(&self) -> anyhow::Result<HeaderName> {
        HeaderName::try_from(self.user_header.to_ascii_lowercase()).map_err(|err| {
            anyhow::anyhow!("invalid user header '{}': {err}", self.user_header)
        })
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            session: SessionConfig {
                message_log_capacity: self.log_capacity,
                supervisor: SupervisorConfig {
                    auto_hide: self.auto_hide,
                    auto_hide_after_stop: self.auto_hide_after_stop,
                },
            },
            ..RegistryConfig::default()
        }
    }
}
