//! Media node selection.
//!
//! Candidates are ordered by one canonical chain:
//!
//! 1. **sticky** - nodes already serving an open router of the room, least
//!    loaded first. Always on.
//! 2. **geo** - nodes within a distance threshold of the joining peer.
//! 3. **load** - nodes below a load threshold, least loaded first.
//!
//! Stages 2 and 3 are optional and run, in configured order, over the open
//! node pool. The result is the sticky nodes followed by the narrowed pool,
//! without duplicates. No stage ever fails: data source errors widen the
//! candidate set instead.

pub mod geo;
pub mod load;
pub mod sticky;

pub use geo::{
    filter_by_distance, peer_position, GeoLocator, GeoLookupError, StaticGeoLocator,
    DEFAULT_GEO_THRESHOLD_KM,
};
pub use load::{filter_by_load, DEFAULT_LOAD_THRESHOLD};
pub use sticky::sticky_nodes;

use crate::media::MediaNode;
use crate::room::{MediaSession, Peer};

use common::types::GeoPosition;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Optional selection stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Geo,
    Load,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "geo" => Ok(Strategy::Geo),
            "load" => Ok(Strategy::Load),
            other => Err(format!("unknown load balancer strategy '{other}'")),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Geo => write!(f, "geo"),
            Strategy::Load => write!(f, "load"),
        }
    }
}

/// Parse a comma-separated strategy list; blank entries are ignored.
///
/// # Errors
///
/// Returns the offending entry's message for an unknown strategy.
pub fn parse_strategies(list: &str) -> Result<Vec<Strategy>, String> {
    list.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Selection tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancerSettings {
    pub strategies: Vec<Strategy>,
    pub geo_threshold_km: f64,
    pub load_threshold: f64,
    /// Position assumed for peers that cannot be located.
    pub default_position: Option<GeoPosition>,
}

impl Default for LoadBalancerSettings {
    fn default() -> Self {
        Self {
            strategies: vec![Strategy::Geo, Strategy::Load],
            geo_threshold_km: DEFAULT_GEO_THRESHOLD_KM,
            load_threshold: DEFAULT_LOAD_THRESHOLD,
            default_position: None,
        }
    }
}

/// Orders media nodes for a room join.
pub struct LoadBalancer {
    settings: LoadBalancerSettings,
    locator: Arc<dyn GeoLocator>,
}

impl fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl LoadBalancer {
    #[must_use]
    pub fn new(settings: LoadBalancerSettings, locator: Arc<dyn GeoLocator>) -> Self {
        Self { settings, locator }
    }

    #[must_use]
    pub fn settings(&self) -> &LoadBalancerSettings {
        &self.settings
    }

    /// Candidate media node ids for `peer` joining `room`, best first.
    ///
    /// An empty result means no open node exists; callers fall back to the
    /// unfiltered pool.
    #[instrument(skip_all, fields(room_id = %room.id(), peer_id = %peer.id))]
    pub fn candidates(
        &self,
        nodes: &[MediaNode],
        room: &dyn MediaSession,
        peer: &Peer,
    ) -> Vec<String> {
        let sticky = sticky_nodes(nodes, room);

        let open: Vec<MediaNode> = nodes
            .iter()
            .filter(|node| !node.is_closed())
            .cloned()
            .collect();
        let mut pool = open.clone();
        for strategy in &self.settings.strategies {
            pool = match strategy {
                Strategy::Geo => {
                    let position =
                        peer_position(self.locator.as_ref(), peer, self.settings.default_position);
                    filter_by_distance(pool, position, self.settings.geo_threshold_km)
                }
                Strategy::Load => filter_by_load(pool, &open, self.settings.load_threshold),
            };
        }

        let mut seen = HashSet::new();
        let ordered: Vec<String> = sticky
            .iter()
            .chain(pool.iter())
            .filter(|node| seen.insert(node.id().to_string()))
            .map(|node| node.id().to_string())
            .collect();

        debug!(
            target: "ss.load_balancer",
            room_id = %room.id(),
            sticky = sticky.len(),
            candidates = ?ordered,
            "Media node candidates"
        );

        ordered
    }
}
