use std::env;
use std::time::Duration;

/// The three ack strategies the per-connection scheduler can run under (§4.4
/// of the gateway design). Fixed for the process lifetime -- not a
/// per-connection choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Fire-and-forget: every inbound frame dispatches immediately.
    NoAck,
    /// Server sends one Ack frame per message and dispatches as soon as
    /// that Ack is written, without waiting for the client to echo it back.
    OnlyAck,
    /// Server solicits an Ack and waits for the client to echo a higher
    /// `ack_seq` before dispatching, retransmitting the solicitation until
    /// `ack_timeout` elapses.
    RigorAck,
}

impl AckMode {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "no_ack" | "noack" => AckMode::NoAck,
            "only_ack" | "onlyack" => AckMode::OnlyAck,
            _ => AckMode::RigorAck,
        }
    }

    pub fn is_ack_mode(self) -> bool {
        !matches!(self, AckMode::NoAck)
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub database_url: String,
    /// URL the dispatcher client (C5) dials to re-inject push frames; by
    /// default this is the gateway's own bind address, since the transfer
    /// pipeline runs in the same process in this deployment.
    pub self_ws_url: String,
    pub ack_mode: AckMode,
    pub max_idle: Duration,
    pub ack_timeout: Duration,
    pub max_err_count: u32,
    /// Bounded concurrency for the group fan-out task-runner.
    pub fanout_concurrency: usize,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
        let self_ws_url = env::var("GATEWAY_SELF_WS_URL")
            .unwrap_or_else(|_| format!("ws://{}/ws", loopback_addr(&bind_addr)));
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            self_ws_url,
            bind_addr,
            ack_mode: env::var("ACK_MODE")
                .map(|v| AckMode::parse(&v))
                .unwrap_or(AckMode::RigorAck),
            max_idle: Duration::from_secs(env_u64("MAX_IDLE_SECS", 3600)),
            ack_timeout: Duration::from_millis(env_u64("ACK_TIMEOUT_MS", 300)),
            max_err_count: env_u64("MAX_ERR_COUNT", 5) as u32,
            fanout_concurrency: env_u64("FANOUT_CONCURRENCY", 32) as usize,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Rewrites a `0.0.0.0:port` bind address into a loopback address so the
/// in-process dispatcher client can dial the gateway it was spawned by.
fn loopback_addr(bind_addr: &str) -> String {
    match bind_addr.split_once(':') {
        Some((_, port)) => format!("127.0.0.1:{port}"),
        None => "127.0.0.1:8080".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_addr_rewrites_wildcard_host() {
        assert_eq!(loopback_addr("0.0.0.0:9100"), "127.0.0.1:9100");
    }

    #[test]
    fn ack_mode_parse_defaults_to_rigor() {
        assert_eq!(AckMode::parse("bogus"), AckMode::RigorAck);
        assert_eq!(AckMode::parse("NoAck"), AckMode::NoAck);
        assert_eq!(AckMode::parse("only_ack"), AckMode::OnlyAck);
    }

    #[test]
    fn no_ack_is_the_only_mode_without_ack_tracking() {
        assert!(!AckMode::NoAck.is_ack_mode());
        assert!(AckMode::OnlyAck.is_ack_mode());
        assert!(AckMode::RigorAck.is_ack_mode());
    }
}
