//! Signaling server configuration.
//!
//! Configuration is loaded from `SS_*` environment variables. Media node
//! shared secrets are held as `SecretString` and redacted in Debug output.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `SS_MEDIA_NODES` | required, JSON array |
//! | `SS_MEDIA_NODE_SECURE` | `true` (`wss`) |
//! | `SS_REQUEST_TIMEOUT_MS` | 3000 |
//! | `SS_HANDSHAKE_TIMEOUT_MS` | 5000 |
//! | `SS_LOAD_BALANCER_STRATEGIES` | `geo,load` |
//! | `SS_GEO_THRESHOLD_KM` | 2000 |
//! | `SS_LOAD_THRESHOLD` | 0.85 |
//! | `SS_GEO_DEFAULT_POSITION` | unset (`"<lat>,<lon>"`) |
//! | `SS_GEOIP_TABLE` | empty, JSON array |
//! | `SS_METRICS_BIND_ADDRESS` | `0.0.0.0:9090` |

use crate::load_balancer::{
    parse_strategies, LoadBalancerSettings, Strategy, DEFAULT_GEO_THRESHOLD_KM,
    DEFAULT_LOAD_THRESHOLD,
};
use crate::rpc::RpcSettings;

use common::secret::SecretString;
use common::types::{GeoPosition, IpNetwork};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default request acknowledgement window in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3000;

/// Default handshake window in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5000;

/// Default optional selection stages.
pub const DEFAULT_LOAD_BALANCER_STRATEGIES: &str = "geo,load";

/// Default Prometheus exporter bind address.
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:9090";

/// One entry of `SS_MEDIA_NODES`.
#[derive(Clone, Deserialize)]
pub struct MediaNodeConfig {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub secret: SecretString,
    pub latitude: f64,
    pub longitude: f64,
}

impl fmt::Debug for MediaNodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaNodeConfig")
            .field("id", &self.id)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("secret", &"[REDACTED]")
            .field("latitude", &self.latitude)
            .field("longitude", &self.longitude)
            .finish()
    }
}

/// One entry of `SS_GEOIP_TABLE`.
#[derive(Debug, Clone, Deserialize)]
struct GeoIpEntry {
    network: String,
    latitude: f64,
    longitude: f64,
}

/// Signaling server configuration.
#[derive(Clone)]
pub struct Config {
    /// Media node pool.
    pub media_nodes: Vec<MediaNodeConfig>,

    /// Connect to media nodes over `wss` (default: true).
    pub media_node_secure: bool,

    /// Request acknowledgement window (default: 3000 ms).
    pub request_timeout: Duration,

    /// Media node readiness window (default: 5000 ms).
    pub handshake_timeout: Duration,

    /// Optional selection stages, in order (default: geo, load).
    pub strategies: Vec<Strategy>,

    /// Geo stage distance threshold (default: 2000 km).
    pub geo_threshold_km: f64,

    /// Load stage threshold (default: 0.85).
    pub load_threshold: f64,

    /// Position assumed for peers that cannot be located.
    pub geo_default_position: Option<GeoPosition>,

    /// Static IP geolocation table.
    pub geoip_table: Vec<(IpNetwork, GeoPosition)>,

    /// Prometheus exporter bind address (default: 0.0.0.0:9090).
    pub metrics_bind_address: SocketAddr,
}

/// Custom Debug implementation that redacts media node secrets.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("media_nodes", &self.media_nodes)
            .field("media_node_secure", &self.media_node_secure)
            .field("request_timeout", &self.request_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("strategies", &self.strategies)
            .field("geo_threshold_km", &self.geo_threshold_km)
            .field("load_threshold", &self.load_threshold)
            .field("geo_default_position", &self.geo_default_position)
            .field("geoip_entries", &self.geoip_table.len())
            .field("metrics_bind_address", &self.metrics_bind_address)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("{name}: {e}"))),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingEnvVar` if `SS_MEDIA_NODES` is unset
    /// - `ConfigError::InvalidValue` for any malformed value
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let raw_nodes = vars
            .get("SS_MEDIA_NODES")
            .ok_or_else(|| ConfigError::MissingEnvVar("SS_MEDIA_NODES".to_string()))?;
        let media_nodes: Vec<MediaNodeConfig> = serde_json::from_str(raw_nodes)
            .map_err(|e| ConfigError::InvalidValue(format!("SS_MEDIA_NODES: {e}")))?;
        for node in &media_nodes {
            GeoPosition::new(node.latitude, node.longitude).map_err(|e| {
                ConfigError::InvalidValue(format!("SS_MEDIA_NODES[{}]: {e}", node.id))
            })?;
        }

        let media_node_secure = parse_or(vars, "SS_MEDIA_NODE_SECURE", true)?;

        let request_timeout = Duration::from_millis(parse_or(
            vars,
            "SS_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
        )?);
        let handshake_timeout = Duration::from_millis(parse_or(
            vars,
            "SS_HANDSHAKE_TIMEOUT_MS",
            DEFAULT_HANDSHAKE_TIMEOUT_MS,
        )?);

        let strategies = parse_strategies(
            vars.get("SS_LOAD_BALANCER_STRATEGIES")
                .map_or(DEFAULT_LOAD_BALANCER_STRATEGIES, String::as_str),
        )
        .map_err(|e| ConfigError::InvalidValue(format!("SS_LOAD_BALANCER_STRATEGIES: {e}")))?;

        let geo_threshold_km = parse_or(vars, "SS_GEO_THRESHOLD_KM", DEFAULT_GEO_THRESHOLD_KM)?;
        let load_threshold = parse_or(vars, "SS_LOAD_THRESHOLD", DEFAULT_LOAD_THRESHOLD)?;
        if !(geo_threshold_km.is_finite() && geo_threshold_km >= 0.0) {
            return Err(ConfigError::InvalidValue(format!(
                "SS_GEO_THRESHOLD_KM: {geo_threshold_km} is not a distance"
            )));
        }
        if !load_threshold.is_finite() {
            return Err(ConfigError::InvalidValue(format!(
                "SS_LOAD_THRESHOLD: {load_threshold} is not finite"
            )));
        }

        let geo_default_position = vars
            .get("SS_GEO_DEFAULT_POSITION")
            .map(|raw| raw.parse::<GeoPosition>())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue(format!("SS_GEO_DEFAULT_POSITION: {e}")))?;

        let geoip_table = match vars.get("SS_GEOIP_TABLE") {
            Some(raw) => parse_geoip_table(raw)?,
            None => Vec::new(),
        };

        let metrics_bind_address = vars
            .get("SS_METRICS_BIND_ADDRESS")
            .map_or(DEFAULT_METRICS_BIND_ADDRESS, String::as_str)
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("SS_METRICS_BIND_ADDRESS: {e}")))?;

        Ok(Config {
            media_nodes,
            media_node_secure,
            request_timeout,
            handshake_timeout,
            strategies,
            geo_threshold_km,
            load_threshold,
            geo_default_position,
            geoip_table,
            metrics_bind_address,
        })
    }

    /// Connection timing for media node connections.
    #[must_use]
    pub fn rpc_settings(&self) -> RpcSettings {
        RpcSettings {
            request_timeout: self.request_timeout,
            handshake_timeout: self.handshake_timeout,
        }
    }

    /// Selection tuning.
    #[must_use]
    pub fn load_balancer_settings(&self) -> LoadBalancerSettings {
        LoadBalancerSettings {
            strategies: self.strategies.clone(),
            geo_threshold_km: self.geo_threshold_km,
            load_threshold: self.load_threshold,
            default_position: self.geo_default_position,
        }
    }
}

fn parse_geoip_table(raw: &str) -> Result<Vec<(IpNetwork, GeoPosition)>, ConfigError> {
    let entries: Vec<GeoIpEntry> = serde_json::from_str(raw)
        .map_err(|e| ConfigError::InvalidValue(format!("SS_GEOIP_TABLE: {e}")))?;
    entries
        .into_iter()
        .map(|entry| {
            let network = entry
                .network
                .parse::<IpNetwork>()
                .map_err(|e| ConfigError::InvalidValue(format!("SS_GEOIP_TABLE: {e}")))?;
            let position = GeoPosition::new(entry.latitude, entry.longitude)
                .map_err(|e| ConfigError::InvalidValue(format!("SS_GEOIP_TABLE: {e}")))?;
            Ok((network, position))
        })
        .collect()
}
