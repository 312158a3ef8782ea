use serde::Deserialize;

use crate::broker::DispatchMode;
use crate::producer::AnswerMode;

/// Top-level configuration settings for the application.
///
/// Includes settings for the server, the broker, the producer role and
/// logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub producer: ProducerSettings,
    pub log: LogSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the broker's WebSocket server binds to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Configuration settings for the broker.
///
/// `mode` selects direct round-robin or command fan-out dispatch.
/// `commands` lists the command names a command-mode broker accepts.
/// `fanout_max_attempts` bounds how many passes an undeliverable command
/// may stay at the head of the queue; `0` disables the limit.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub mode: DispatchMode,
    pub fanout_max_attempts: u32,
    pub commands: Vec<String>,
}

/// Configuration settings for the producer role.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProducerSettings {
    pub answer_mode: AnswerMode,
    pub request_timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub producer: Option<PartialProducerSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub mode: Option<DispatchMode>,
    pub fanout_max_attempts: Option<u32>,
    pub commands: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialProducerSettings {
    pub answer_mode: Option<AnswerMode>,
    pub request_timeout_ms: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            broker: BrokerSettings {
                mode: DispatchMode::Direct,
                fanout_max_attempts: 16,
                commands: Vec::new(),
            },
            producer: ProducerSettings {
                answer_mode: AnswerMode::Single,
                request_timeout_ms: 5000,
                sweep_interval_ms: 1000,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fill every value missing from `partial` with the default.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let server = partial.server;
        let broker = partial.broker;
        let producer = partial.producer;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
            },
            broker: BrokerSettings {
                mode: broker
                    .as_ref()
                    .and_then(|b| b.mode)
                    .unwrap_or(default.broker.mode),
                fanout_max_attempts: broker
                    .as_ref()
                    .and_then(|b| b.fanout_max_attempts)
                    .unwrap_or(default.broker.fanout_max_attempts),
                commands: broker
                    .and_then(|b| b.commands)
                    .unwrap_or(default.broker.commands),
            },
            producer: ProducerSettings {
                answer_mode: producer
                    .as_ref()
                    .and_then(|p| p.answer_mode)
                    .unwrap_or(default.producer.answer_mode),
                request_timeout_ms: producer
                    .as_ref()
                    .and_then(|p| p.request_timeout_ms)
                    .unwrap_or(default.producer.request_timeout_ms),
                sweep_interval_ms: producer
                    .as_ref()
                    .and_then(|p| p.sweep_interval_ms)
                    .unwrap_or(default.producer.sweep_interval_ms),
            },
            log: LogSettings {
                level: partial
                    .log
                    .and_then(|l| l.level)
                    .unwrap_or(default.log.level),
            },
        }
    }

    /// `host:port` the broker server binds to.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
