//! Edge server configuration

use crate::error::EdgeError;
use edgelink_proto::DEFAULT_TUNNEL_PATH;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Command-line arguments of `edgelink edge`
#[derive(Debug, Clone, clap::Args)]
pub struct EdgeArgs {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Tenant routing token(s), comma separated
    #[arg(long = "tenant", env = "URL_PREFIX", value_delimiter = ',', required = true)]
    pub tenants: Vec<String>,

    /// Domain the sticky-routing cookie is scoped to
    #[arg(long, env = "DOMAIN", default_value = "localhost")]
    pub cookie_domain: String,

    /// Seconds to wait for an agent's reply before answering 500
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 40)]
    pub request_timeout_secs: u64,

    /// Path where agents open the tunnel channel
    #[arg(long, env = "TUNNEL_PATH", default_value = DEFAULT_TUNNEL_PATH)]
    pub tunnel_path: String,

    /// Largest public request body accepted, in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 100_000_000)]
    pub max_body_bytes: usize,
}

impl EdgeArgs {
    pub fn into_config(self) -> Result<EdgeConfig, EdgeError> {
        let config = EdgeConfig {
            bind_addr: SocketAddr::new(self.bind, self.port),
            tenants: self
                .tenants
                .into_iter()
                .map(|tenant| tenant.trim().to_string())
                .collect(),
            cookie_domain: self.cookie_domain,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            tunnel_path: self.tunnel_path,
            max_body_bytes: self.max_body_bytes,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

/// Validated edge settings, immutable once the server starts
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub bind_addr: SocketAddr,
    pub tenants: Vec<String>,
    pub cookie_domain: String,
    pub request_timeout: Duration,
    pub tunnel_path: String,
    pub max_body_bytes: usize,
    /// Time an agent has to send its `connect` message
    pub handshake_timeout: Duration,
    /// Interval between keepalive pings on agent connections
    pub ping_interval: Duration,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000),
            tenants: Vec::new(),
            cookie_domain: "localhost".to_string(),
            request_timeout: Duration::from_secs(40),
            tunnel_path: DEFAULT_TUNNEL_PATH.to_string(),
            max_body_bytes: 100_000_000,
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl EdgeConfig {
    pub fn validate(&self) -> Result<(), EdgeError> {
        if self.tenants.is_empty() {
            return Err(EdgeError::Config("at least one tenant is required".into()));
        }

        let mut seen = HashSet::new();
        for tenant in &self.tenants {
            if tenant.is_empty() {
                return Err(EdgeError::Config("tenant tokens must not be empty".into()));
            }
            if !tenant.chars().all(is_token_char) {
                return Err(EdgeError::Config(format!(
                    "tenant token {:?} may only contain letters, digits, '-', '_', '.' and '~'",
                    tenant
                )));
            }
            if !seen.insert(tenant.as_str()) {
                return Err(EdgeError::Config(format!("duplicate tenant {:?}", tenant)));
            }
        }

        if !self.tunnel_path.starts_with('/') || self.tunnel_path.len() < 2 {
            return Err(EdgeError::Config(format!(
                "tunnel path {:?} must start with '/'",
                self.tunnel_path
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(EdgeError::Config("request timeout must be positive".into()));
        }
        if self.handshake_timeout.is_zero() || self.ping_interval.is_zero() {
            return Err(EdgeError::Config(
                "handshake timeout and ping interval must be positive".into(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(EdgeError::Config("max body size must be positive".into()));
        }

        Ok(())
    }
}

// Tokens end up in URL paths and cookie values
fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        edge: EdgeArgs,
    }

    fn config(tenants: &[&str]) -> EdgeConfig {
        EdgeConfig {
            tenants: tenants.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_args() {
        let cli = TestCli::parse_from([
            "edge",
            "--tenant",
            "alpha, beta",
            "--port",
            "8080",
            "--cookie-domain",
            "example.com",
        ]);
        let config = cli.edge.into_config().unwrap();

        assert_eq!(config.tenants, vec!["alpha", "beta"]);
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.cookie_domain, "example.com");
        assert_eq!(config.request_timeout, Duration::from_secs(40));
        assert_eq!(config.tunnel_path, DEFAULT_TUNNEL_PATH);
    }

    #[test]
    fn test_validate() {
        assert!(config(&["alpha"]).validate().is_ok());
        assert!(config(&[]).validate().is_err());
        assert!(config(&[""]).validate().is_err());
        assert!(config(&["alpha", "alpha"]).validate().is_err());
        assert!(config(&["a/b"]).validate().is_err());

        let mut bad_path = config(&["alpha"]);
        bad_path.tunnel_path = "tunnel".to_string();
        assert!(bad_path.validate().is_err());

        let mut zero_timeout = config(&["alpha"]);
        zero_timeout.request_timeout = Duration::ZERO;
        assert!(matches!(zero_timeout.validate(), Err(EdgeError::Config(_))));
    }
}
