//! Geo stage: keep nodes close to the joining peer.
//!
//! The peer's position is resolved from its socket address, then from the
//! first `X-Forwarded-For` entry, then from the configured default. Lookup
//! failures never reject a join: without a position the stage passes every
//! candidate through.

use crate::media::MediaNode;
use crate::room::Peer;

use common::types::{GeoPosition, IpNetwork};
use std::net::IpAddr;
use thiserror::Error;
use tracing::debug;

/// Default distance threshold in kilometres.
pub const DEFAULT_GEO_THRESHOLD_KM: f64 = 2000.0;

/// Geolocation lookup failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeoLookupError {
    #[error("No location known for {0}")]
    NotFound(IpAddr),

    #[error("Geolocation backend unavailable: {0}")]
    Unavailable(String),
}

/// IP geolocation source.
pub trait GeoLocator: Send + Sync {
    /// Position of `ip`.
    ///
    /// # Errors
    ///
    /// Returns `GeoLookupError` when the address cannot be located.
    fn locate(&self, ip: IpAddr) -> Result<GeoPosition, GeoLookupError>;
}

/// Static CIDR table; the most specific matching network wins.
#[derive(Debug, Clone, Default)]
pub struct StaticGeoLocator {
    entries: Vec<(IpNetwork, GeoPosition)>,
}

impl StaticGeoLocator {
    #[must_use]
    pub fn new(entries: Vec<(IpNetwork, GeoPosition)>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl GeoLocator for StaticGeoLocator {
    fn locate(&self, ip: IpAddr) -> Result<GeoPosition, GeoLookupError> {
        self.entries
            .iter()
            .filter(|(network, _)| network.contains(ip))
            .max_by_key(|(network, _)| network.prefix())
            .map(|(_, position)| *position)
            .ok_or(GeoLookupError::NotFound(ip))
    }
}

/// Resolve where `peer` is, falling back to `default`.
pub fn peer_position(
    locator: &dyn GeoLocator,
    peer: &Peer,
    default: Option<GeoPosition>,
) -> Option<GeoPosition> {
    let addresses = [peer.address, peer.forwarded_address()];
    for ip in addresses.into_iter().flatten() {
        match locator.locate(ip) {
            Ok(position) => return Some(position),
            Err(e) => {
                debug!(
                    target: "ss.load_balancer",
                    peer_id = %peer.id,
                    error = %e,
                    "Geolocation lookup failed"
                );
            }
        }
    }
    default
}

/// Keep candidates within `threshold_km` of `position`, in input order.
///
/// Without a position, or when no candidate is close enough, every
/// candidate passes.
#[must_use]
pub fn filter_by_distance(
    candidates: Vec<MediaNode>,
    position: Option<GeoPosition>,
    threshold_km: f64,
) -> Vec<MediaNode> {
    let Some(position) = position else {
        return candidates;
    };

    let nearby: Vec<MediaNode> = candidates
        .iter()
        .filter(|node| node.position().distance_km(&position) <= threshold_km)
        .cloned()
        .collect();

    if nearby.is_empty() {
        debug!(
            target: "ss.load_balancer",
            threshold_km,
            "No media node within geo threshold, keeping all candidates"
        );
        candidates
    } else {
        nearby
    }
}
