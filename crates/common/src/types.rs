//! Common data types for signaling server components.

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Mean Earth radius in kilometres, used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A geographic coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    /// Latitude in degrees, -90..=90
    pub latitude: f64,
    /// Longitude in degrees, -180..=180
    pub longitude: f64,
}

impl GeoPosition {
    /// Create a new position, validating ranges.
    ///
    /// # Errors
    ///
    /// Returns `CommonError::InvalidCoordinate` if either component is out of
    /// range or not finite.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(CommonError::InvalidCoordinate(format!(
                "latitude {latitude} out of range"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(CommonError::InvalidCoordinate(format!(
                "longitude {longitude} out of range"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance to `other` in kilometres (haversine formula).
    #[must_use]
    pub fn distance_km(&self, other: &GeoPosition) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }
}

/// Parses `"<latitude>,<longitude>"`.
impl FromStr for GeoPosition {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| CommonError::InvalidCoordinate(s.to_string()))?;
        let latitude = lat
            .trim()
            .parse::<f64>()
            .map_err(|_| CommonError::InvalidCoordinate(s.to_string()))?;
        let longitude = lon
            .trim()
            .parse::<f64>()
            .map_err(|_| CommonError::InvalidCoordinate(s.to_string()))?;
        Self::new(latitude, longitude)
    }
}

impl fmt::Display for GeoPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// An IP network in CIDR notation (e.g. `10.0.0.0/8`, `2001:db8::/32`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    /// Network address.
    #[must_use]
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length in bits.
    #[must_use]
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether `ip` falls inside this network. Address families never match
    /// each other.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix))
                    .unwrap_or(0);
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

/// Parses `"<addr>/<prefix>"`; a bare address is a host network.
impl FromStr for IpNetwork {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let addr: IpAddr = addr_part
            .parse()
            .map_err(|_| CommonError::InvalidNetwork(s.to_string()))?;
        let max_prefix = if addr.is_ipv4() { 32 } else { 128 };

        let prefix = match prefix_part {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| CommonError::InvalidNetwork(s.to_string()))?,
            None => max_prefix,
        };
        if prefix > max_prefix {
            return Err(CommonError::InvalidNetwork(s.to_string()));
        }

        Ok(Self { addr, prefix })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical_points_is_zero() {
        let p = GeoPosition::new(59.3293, 18.0686).unwrap();
        assert!(p.distance_km(&p).abs() < 1e-9);
    }

    #[test]
    fn test_distance_stockholm_to_new_york() {
        let stockholm = GeoPosition::new(59.3293, 18.0686).unwrap();
        let new_york = GeoPosition::new(40.7128, -74.0060).unwrap();

        let d = stockholm.distance_km(&new_york);
        // Roughly 6300 km
        assert!((6250.0..6400.0).contains(&d), "unexpected distance {d}");
        assert!((d - new_york.distance_km(&stockholm)).abs() < 1e-6);
    }

    #[test]
    fn test_geo_position_parse() {
        let p: GeoPosition = "52.52, 13.405".parse().unwrap();
        assert!((p.latitude - 52.52).abs() < f64::EPSILON);
        assert!((p.longitude - 13.405).abs() < f64::EPSILON);

        assert!("91,0".parse::<GeoPosition>().is_err());
        assert!("0,181".parse::<GeoPosition>().is_err());
        assert!("not-a-coordinate".parse::<GeoPosition>().is_err());
    }

    #[test]
    fn test_ip_network_contains_v4() {
        let net: IpNetwork = "10.0.0.0/8".parse().unwrap();
        assert!(net.contains("10.1.2.3".parse().unwrap()));
        assert!(!net.contains("11.0.0.1".parse().unwrap()));
        assert!(!net.contains("::1".parse().unwrap()));
    }

    #[test]
    fn test_ip_network_zero_prefix_matches_everything() {
        let net: IpNetwork = "0.0.0.0/0".parse().unwrap();
        assert!(net.contains("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn test_ip_network_host_and_v6() {
        let host: IpNetwork = "192.0.2.1".parse().unwrap();
        assert_eq!(host.prefix(), 32);
        assert!(host.contains("192.0.2.1".parse().unwrap()));
        assert!(!host.contains("192.0.2.2".parse().unwrap()));

        let v6: IpNetwork = "2001:db8::/32".parse().unwrap();
        assert!(v6.contains("2001:db8:1::1".parse().unwrap()));
        assert!(!v6.contains("2001:db9::1".parse().unwrap()));
    }

    #[test]
    fn test_ip_network_rejects_bad_prefix() {
        assert!("10.0.0.0/33".parse::<IpNetwork>().is_err());
        assert!("10.0.0.0/abc".parse::<IpNetwork>().is_err());
        assert!("nonsense/8".parse::<IpNetwork>().is_err());
    }
}
