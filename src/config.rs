//! Code for the configuration of the application.

use std::{net::IpAddr, path::Path, time::Duration};

use anyhow::{Context, Result};
use flashforge::{DiscoveryConfig, ReplyFraming, TransportConfig};
use serde::{Deserialize, Serialize};

/// The configuration of the application.
#[derive(Default, Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// The printer to talk to.
    pub printer: Option<PrinterConfig>,
    /// How to search the network for printers.
    pub discovery: Option<DiscoverySettings>,
    /// The polling loop of the `monitor` command.
    pub monitor: Option<MonitorConfig>,
}

impl Config {
    /// Parse a configuration from a toml file.
    pub fn from_file(file: &Path) -> Result<Self> {
        let config =
            std::fs::read_to_string(file).with_context(|| format!("reading config file {}", file.display()))?;
        Self::from_str(&config)
    }

    /// Parse a configuration from a toml string.
    pub fn from_str(config: &str) -> Result<Self> {
        Ok(toml::from_str(config)?)
    }

    /// Load `file` if it exists, otherwise fall back to the defaults.
    pub fn load_or_default(file: &Path) -> Result<Self> {
        if file.exists() {
            Self::from_file(file)
        } else {
            Ok(Self::default())
        }
    }

    /// The configured printer address, if any.
    pub fn host(&self) -> Option<&str> {
        self.printer.as_ref().and_then(|p| p.host.as_deref())
    }

    /// Transport settings for `host`, with the file's overrides applied.
    pub fn transport(&self, host: &str, port: Option<u16>) -> TransportConfig {
        let mut transport = TransportConfig::new(host);
        if let Some(printer) = &self.printer {
            if let Some(port) = printer.port {
                transport.port = port;
            }
            if let Some(secs) = printer.connect_timeout_secs {
                transport.connect_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = printer.read_timeout_secs {
                transport.read_timeout = Duration::from_secs(secs);
            }
            if let Some(framing) = printer.framing {
                transport.framing = framing;
            }
            if let Some(max) = printer.max_reply_bytes {
                transport.max_reply_bytes = max;
            }
        }
        if let Some(port) = port {
            transport.port = port;
        }
        transport
    }

    /// Discovery settings with the file's overrides applied.
    pub fn discovery(&self) -> DiscoveryConfig {
        let mut discovery = DiscoveryConfig::default();
        if let Some(settings) = &self.discovery {
            if let Some(port) = settings.local_port {
                discovery.local_port = port;
            }
            if let Some(ttl) = settings.ttl {
                discovery.ttl = ttl;
            }
            discovery.interface = settings.interface.or(discovery.interface);
        }
        discovery
    }

    /// How long a discovery run waits for replies.
    pub fn discovery_timeout(&self) -> Duration {
        self.discovery
            .as_ref()
            .and_then(|d| d.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(flashforge::discover::DEFAULT_DISCOVERY_TIMEOUT)
    }

    /// Time between two polls of the `monitor` command.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.as_ref().map_or(DEFAULT_MONITOR_INTERVAL_SECS, |m| m.interval_secs))
    }
}

const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 5;

fn default_interval_secs() -> u64 {
    DEFAULT_MONITOR_INTERVAL_SECS
}

/// The configuration for the printer connection.
#[derive(Default, Debug, Clone, Deserialize, Serialize)]
pub struct PrinterConfig {
    /// The printer's IP address or host name.
    pub host: Option<String>,
    /// The printer's control port.
    pub port: Option<u16>,
    /// Upper bound on the TCP handshake, in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Upper bound on waiting for a reply, in seconds.
    pub read_timeout_secs: Option<u64>,
    /// How the end of a reply is detected.
    pub framing: Option<ReplyFraming>,
    /// Replies larger than this are rejected.
    pub max_reply_bytes: Option<usize>,
}

/// The configuration for printer discovery.
#[derive(Default, Debug, Clone, Deserialize, Serialize)]
pub struct DiscoverySettings {
    /// How long to wait for replies, in seconds.
    pub timeout_secs: Option<u64>,
    /// Local interface to send the probe from.
    pub interface: Option<IpAddr>,
    /// Local port to send the probe from.
    pub local_port: Option<u16>,
    /// Multicast TTL of the probe.
    pub ttl: Option<u32>,
}

/// The configuration for the `monitor` command.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Seconds between two polls.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_config_from_str_empty() {
        let config = Config::from_str("").unwrap();
        assert!(config.printer.is_none());
        assert_eq!(config.host(), None);
        assert_eq!(config.monitor_interval(), Duration::from_secs(5));
        assert_eq!(config.discovery_timeout(), Duration::from_secs(15));

        let transport = config.transport("192.168.1.50", None);
        assert_eq!(transport.addr(), "192.168.1.50:8899");
        assert_eq!(transport.framing, ReplyFraming::TerminalMarker);
    }

    #[test]
    fn test_config_from_str_full() {
        let config = r#"
            [printer]
            host = "192.168.50.64"
            port = 8898
            read_timeout_secs = 2
            framing = "single-read"

            [discovery]
            timeout_secs = 3
            interface = "192.168.50.10"

            [monitor]
            interval_secs = 10
        "#;
        let config = Config::from_str(config).unwrap();
        assert_eq!(config.host(), Some("192.168.50.64"));

        let transport = config.transport("192.168.50.64", None);
        assert_eq!(transport.port, 8898);
        assert_eq!(transport.read_timeout, Duration::from_secs(2));
        assert_eq!(transport.connect_timeout, Duration::from_secs(3));
        assert_eq!(transport.framing, ReplyFraming::SingleRead);

        let discovery = config.discovery();
        assert_eq!(discovery.interface, Some("192.168.50.10".parse().unwrap()));
        assert_eq!(discovery.local_port, 8002);
        assert_eq!(config.discovery_timeout(), Duration::from_secs(3));
        assert_eq!(config.monitor_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_port_flag_overrides_file() {
        let config = Config::from_str("[printer]\nport = 8898\n").unwrap();
        assert_eq!(config.transport("printer.local", Some(9000)).port, 9000);
    }

    #[test]
    fn test_empty_monitor_section_uses_default_interval() {
        let config = Config::from_str("[monitor]\n").unwrap();
        assert_eq!(config.monitor_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_framing_is_rejected() {
        assert!(Config::from_str("[printer]\nframing = \"line\"\n").is_err());
    }
}
