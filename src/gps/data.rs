// src/gps/data.rs
//! Fix records and satellite bookkeeping

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// GGA fix quality indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixQuality {
    NotAvailable,
    Gps,
    Dgps,
    Pps,
    RtkFixed,
    RtkFloat,
    Estimated,
    Manual,
    Simulation,
}

impl FixQuality {
    /// Decode the one-digit GGA code. Anything unrecognized is `NotAvailable`.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "1" => FixQuality::Gps,
            "2" => FixQuality::Dgps,
            "3" => FixQuality::Pps,
            "4" => FixQuality::RtkFixed,
            "5" => FixQuality::RtkFloat,
            "6" => FixQuality::Estimated,
            "7" => FixQuality::Manual,
            "8" => FixQuality::Simulation,
            _ => FixQuality::NotAvailable,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FixQuality::NotAvailable => "No fix",
            FixQuality::Gps => "GPS",
            FixQuality::Dgps => "DGPS",
            FixQuality::Pps => "PPS",
            FixQuality::RtkFixed => "RTK",
            FixQuality::RtkFloat => "Float RTK",
            FixQuality::Estimated => "Estimated",
            FixQuality::Manual => "Manual",
            FixQuality::Simulation => "Simulation",
        }
    }
}

/// GSA fix dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixDimension {
    None,
    TwoD,
    ThreeD,
}

impl FixDimension {
    /// Decode the one-digit GSA code. Anything unrecognized is `None`.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "2" => FixDimension::TwoD,
            "3" => FixDimension::ThreeD,
            _ => FixDimension::None,
        }
    }

    /// gpsd `mode` value: 1 = no fix, 2 = 2D, 3 = 3D
    pub fn gpsd_mode(&self) -> u8 {
        match self {
            FixDimension::None => 1,
            FixDimension::TwoD => 2,
            FixDimension::ThreeD => 3,
        }
    }
}

/// NMEA 2.3+ FAA mode indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaaMode {
    NotValid,
    Simulated,
    Manual,
    Estimated,
    Autonomous,
    Differential,
    RtkInteger,
    RtkFloat,
    Precise,
}

impl FaaMode {
    /// Decode the single-letter indicator. Anything unrecognized is `NotValid`.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "S" => FaaMode::Simulated,
            "M" => FaaMode::Manual,
            "E" => FaaMode::Estimated,
            "A" => FaaMode::Autonomous,
            "D" => FaaMode::Differential,
            "R" => FaaMode::RtkInteger,
            "F" => FaaMode::RtkFloat,
            "P" => FaaMode::Precise,
            _ => FaaMode::NotValid,
        }
    }
}

/// One satellite as seen during a single fix cycle.
///
/// Identity is the `id` alone; see the `PartialEq` impl.
#[derive(Debug, Clone, Default)]
pub struct Satellite {
    pub id: u16,
    pub elevation: Option<i16>,      // degrees, 0-90
    pub azimuth: Option<u16>,        // degrees, 0-359
    pub signal_to_noise: Option<u8>, // dB-Hz, None = in view but not tracked
    pub used: bool,
}

impl Satellite {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.signal_to_noise.is_some()
    }
}

impl PartialEq for Satellite {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Satellite {}

impl std::hash::Hash for Satellite {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Time-Position-Velocity record, accumulated over one fix cycle
#[derive(Debug, Clone, Default)]
pub struct Tpv {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude_msl: Option<f64>,           // meters
    pub height_above_ellipsoid: Option<f64>, // meters
    pub speed_knots: Option<f64>,
    pub track_angle: Option<f64>,        // degrees true
    pub magnetic_variation: Option<f64>, // degrees, West negative
    pub hdop: Option<f64>,
    pub vdop: Option<f64>,
    pub pdop: Option<f64>,
    pub fix_quality: Option<FixQuality>,
    pub fix_dimension: Option<FixDimension>,
    pub forced_mode: Option<bool>,
    pub status_warning: Option<bool>,
    pub faa_mode: Option<FaaMode>,
    pub time: Option<NaiveTime>,
    pub date: Option<NaiveDate>,
    pub satellites: HashMap<u16, Satellite>,
    pub satellites_in_view: Option<u16>,
    /// Checksum-valid sentences of this cycle, in arrival order, without line terminators
    pub sentences: Vec<String>,
    gsv_expected: Option<u8>,
    gsv_seen: BTreeSet<u8>,
}

impl Tpv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the satellite with `id`, creating it on first mention in this cycle.
    pub fn satellite_mut(&mut self, id: u16) -> &mut Satellite {
        self.satellites.entry(id).or_insert_with(|| Satellite::new(id))
    }

    /// UTC timestamp, only when both the date and the time were reported this cycle
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let (date, time) = (self.date?, self.time?);
        Some(NaiveDateTime::new(date, time).and_utc())
    }

    /// (latitude, longitude) in decimal degrees
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    pub fn has_fix(&self) -> bool {
        self.position().is_some()
    }

    pub fn satellites_used(&self) -> usize {
        self.satellites.values().filter(|sat| sat.used).count()
    }

    /// Satellites ordered by id, for stable reporting
    pub fn sorted_satellites(&self) -> Vec<&Satellite> {
        let mut sats: Vec<&Satellite> = self.satellites.values().collect();
        sats.sort_by_key(|sat| sat.id);
        sats
    }

    /// Note one GSV message of this cycle's census
    pub fn record_gsv(&mut self, total: Option<u8>, index: Option<u8>) {
        if let Some(total) = total {
            self.gsv_expected = Some(total);
        }
        if let Some(index) = index {
            self.gsv_seen.insert(index);
        }
    }

    /// Whether every GSV message announced for this cycle arrived.
    /// `None` when no GSV was seen at all.
    pub fn gsv_census_complete(&self) -> Option<bool> {
        let expected = self.gsv_expected?;
        Some((1..=expected).all(|idx| self.gsv_seen.contains(&idx)))
    }

    pub fn gsv_census(&self) -> (usize, Option<u8>) {
        (self.gsv_seen.len(), self.gsv_expected)
    }
}

impl std::fmt::Display for Tpv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ts = self
            .timestamp()
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "None".to_string());
        match self.position() {
            Some((lat, lon)) => write!(
                f,
                "TPV<ll=({:.6}, {:.6}), ts={}, alt={:?}m, fix={}, sats={}/{}>",
                lat,
                lon,
                ts,
                self.altitude_msl,
                self.fix_quality.map_or("Unknown", |q| q.description()),
                self.satellites_used(),
                self.satellites.len()
            ),
            None => write!(f, "TPV<ll=None, ts={}>", ts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_fallbacks() {
        assert_eq!(FixQuality::from_code("4"), FixQuality::RtkFixed);
        assert_eq!(FixQuality::from_code("9"), FixQuality::NotAvailable);
        assert_eq!(FixQuality::from_code(""), FixQuality::NotAvailable);
        assert_eq!(FixDimension::from_code("3"), FixDimension::ThreeD);
        assert_eq!(FixDimension::from_code("x"), FixDimension::None);
        assert_eq!(FaaMode::from_code("D"), FaaMode::Differential);
        assert_eq!(FaaMode::from_code("Z"), FaaMode::NotValid);
    }

    #[test]
    fn test_timestamp_requires_both_halves() {
        let mut tpv = Tpv::new();
        assert!(tpv.timestamp().is_none());

        tpv.time = NaiveTime::from_hms_opt(12, 35, 19);
        assert!(tpv.timestamp().is_none());

        tpv.date = NaiveDate::from_ymd_opt(2094, 3, 23);
        let ts = tpv.timestamp().unwrap();
        assert_eq!(ts.to_rfc3339(), "2094-03-23T12:35:19+00:00");
    }

    #[test]
    fn test_satellite_identity_is_id() {
        let mut a = Satellite::new(7);
        a.elevation = Some(40);
        let b = Satellite::new(7);
        assert_eq!(a, b);

        let mut tpv = Tpv::new();
        tpv.satellite_mut(7).used = true;
        tpv.satellite_mut(7).elevation = Some(12);
        assert_eq!(tpv.satellites.len(), 1);
        assert!(tpv.satellites[&7].used);
        assert_eq!(tpv.satellites_used(), 1);
    }

    #[test]
    fn test_gsv_census() {
        let mut tpv = Tpv::new();
        assert_eq!(tpv.gsv_census_complete(), None);

        tpv.record_gsv(Some(3), Some(2));
        tpv.record_gsv(Some(3), Some(1));
        assert_eq!(tpv.gsv_census_complete(), Some(false));

        tpv.record_gsv(Some(3), Some(3));
        assert_eq!(tpv.gsv_census_complete(), Some(true));
    }
}
