use serde::Deserialize;

use crate::broker::engine::DEFAULT_OUTBOUND_LIMIT;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub log: LogSettings,
    pub broker: BrokerSettings,
}

/// Where the broker listens, and where clients connect by default.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Unwritten frames a subscriber may have before it is disconnected.
    pub outbound_limit: usize,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub log: Option<PartialLogSettings>,
    pub broker: Option<PartialBrokerSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub outbound_limit: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8888,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
            broker: BrokerSettings {
                outbound_limit: DEFAULT_OUTBOUND_LIMIT,
            },
        }
    }
}

impl Settings {
    /// `host:port` of the broker.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Fill every field missing from `partial` with its default.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Self::default();
        let server = partial.server.as_ref();

        Self {
            server: ServerSettings {
                host: server
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server.and_then(|s| s.port).unwrap_or(default.server.port),
            },
            log: LogSettings {
                level: partial
                    .log
                    .and_then(|l| l.level)
                    .unwrap_or(default.log.level),
            },
            broker: BrokerSettings {
                outbound_limit: partial
                    .broker
                    .and_then(|b| b.outbound_limit)
                    .unwrap_or(default.broker.outbound_limit),
            },
        }
    }
}
