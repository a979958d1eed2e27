//! Environment/CLI configuration, read once at startup into a single
//! immutable record (§6 of the design: the configuration is one of the
//! three pieces of process-wide state).

use tnt_core::DEFAULT_PORT;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub max_connections: usize,
    pub max_conn_per_ip: u32,
    pub rate_limit_enabled: bool,
    pub access_token: Option<String>,
    pub ssh_log_level: u8,
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Reads `TNT_*`/`PORT` environment overrides. Out-of-range values are
/// silently ignored in favor of the default, per §6.
impl Config {
    pub fn from_env(cli_port: Option<u16>) -> Self {
        let mut cfg = Config {
            bind_addr: "0.0.0.0".to_string(),
            port: cli_port.unwrap_or(DEFAULT_PORT),
            max_connections: tnt_core::MAX_CLIENTS,
            max_conn_per_ip: 5,
            rate_limit_enabled: true,
            access_token: None,
            ssh_log_level: 0,
        };

        if let Some(port) = env_parsed::<u16>("PORT") {
            cfg.port = port;
        }
        if let Ok(addr) = std::env::var("TNT_BIND_ADDR") {
            if !addr.is_empty() {
                cfg.bind_addr = addr;
            }
        }
        if let Some(n) = env_parsed::<usize>("TNT_MAX_CONNECTIONS") {
            if (1..=1024).contains(&n) {
                cfg.max_connections = n;
            }
        }
        if let Some(n) = env_parsed::<u32>("TNT_MAX_CONN_PER_IP") {
            if (1..=100).contains(&n) {
                cfg.max_conn_per_ip = n;
            }
        }
        if let Some(n) = env_parsed::<u8>("TNT_RATE_LIMIT") {
            if n == 0 || n == 1 {
                cfg.rate_limit_enabled = n == 1;
            }
        }
        if let Ok(token) = std::env::var("TNT_ACCESS_TOKEN") {
            if !token.is_empty() {
                cfg.access_token = Some(token);
            }
        }
        if let Some(n) = env_parsed::<u8>("TNT_SSH_LOG_LEVEL") {
            if n <= 4 {
                cfg.ssh_log_level = n;
            }
        }

        cfg
    }

    pub fn token_required(&self) -> bool {
        self.access_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_env_values_are_ignored() {
        std::env::set_var("TNT_MAX_CONNECTIONS", "99999");
        let cfg = Config::from_env(None);
        assert_eq!(cfg.max_connections, tnt_core::MAX_CLIENTS);
        std::env::remove_var("TNT_MAX_CONNECTIONS");
    }

    #[test]
    fn cli_port_used_when_env_port_absent() {
        std::env::remove_var("PORT");
        let cfg = Config::from_env(Some(1234));
        assert_eq!(cfg.port, 1234);
    }
}
