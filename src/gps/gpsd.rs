// src/gps/gpsd.rs
//! gpsd JSON protocol subset: reports sent to clients and the commands they send back

use super::data::Tpv;
use crate::error::{GpsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROTO_MAJOR: u8 = 3;
pub const PROTO_MINOR: u8 = 11;
pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

/// Nominal user equivalent range error in meters, scaled by DOP for error estimates
const UERE: f64 = 8.0;
const KNOTS_TO_MPS: f64 = 0.514444;

/// Timestamp format gpsd uses on the wire
pub fn format_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// One JSON object sent to a client, discriminated by `class`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "class", rename_all = "UPPERCASE")]
pub enum Report {
    Version(Version),
    Devices(Devices),
    Watch(Watch),
    Tpv(TpvReport),
    Sky(SkyReport),
}

impl Report {
    /// Compact JSON, newline terminated
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Version {
    pub release: String,
    pub rev: String,
    pub proto_major: u8,
    pub proto_minor: u8,
}

impl Default for Version {
    fn default() -> Self {
        Self {
            release: RELEASE.to_string(),
            rev: RELEASE.to_string(),
            proto_major: PROTO_MAJOR,
            proto_minor: PROTO_MINOR,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Device {
    class: &'static str,
    pub path: String,
    pub driver: String,
    pub activated: String,
    pub flags: u8,
    pub native: u8,
    pub bps: u32,
    pub parity: String,
    pub stopbits: u8,
    pub cycle: f64,
}

impl Device {
    /// Static descriptor for an NMEA receiver at `path`
    pub fn nmea(path: &str, bps: u32, activated: DateTime<Utc>) -> Self {
        Self {
            class: "DEVICE",
            path: path.to_string(),
            driver: "NMEA0183".to_string(),
            activated: format_time(&activated),
            flags: 1,
            native: 0,
            bps,
            parity: "N".to_string(),
            stopbits: 1,
            cycle: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Devices {
    pub devices: Vec<Device>,
}

/// Watch acknowledgement, echoing the negotiated options
#[derive(Debug, Clone, Serialize)]
pub struct Watch {
    pub enable: bool,
    pub json: bool,
    pub nmea: bool,
    pub raw: u8,
    pub scaled: bool,
    pub timing: bool,
    pub split24: bool,
    pub pps: bool,
}

impl Watch {
    pub fn new(enable: bool, json: bool, raw: u8) -> Self {
        Self {
            enable,
            json,
            nmea: false,
            raw,
            scaled: false,
            timing: false,
            split24: false,
            pps: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TpvReport {
    pub device: String,
    pub mode: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
    #[serde(rename = "altHAE", skip_serializing_if = "Option::is_none")]
    pub alt_hae: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epx: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epv: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>, // m/s
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magvar: Option<f64>,
}

impl TpvReport {
    pub fn from_tpv(device: &str, tpv: &Tpv) -> Self {
        Self {
            device: device.to_string(),
            mode: tpv.fix_dimension.map_or(0, |dim| dim.gpsd_mode()),
            time: tpv.timestamp().map(|ts| format_time(&ts)),
            lat: tpv.latitude,
            lon: tpv.longitude,
            alt: tpv.altitude_msl,
            alt_hae: tpv.height_above_ellipsoid,
            epx: tpv.hdop.map(|dop| dop * UERE),
            epy: tpv.hdop.map(|dop| dop * UERE),
            epv: tpv.vdop.map(|dop| dop * UERE),
            track: tpv.track_angle,
            speed: tpv.speed_knots.map(|knots| knots * KNOTS_TO_MPS),
            magvar: tpv.magnetic_variation,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkySatellite {
    #[serde(rename = "PRN")]
    pub prn: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub el: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub az: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ss: Option<u8>,
    pub used: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkyReport {
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hdop: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vdop: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdop: Option<f64>,
    pub satellites: Vec<SkySatellite>,
}

impl SkyReport {
    pub fn from_tpv(device: &str, tpv: &Tpv) -> Self {
        Self {
            device: device.to_string(),
            hdop: tpv.hdop,
            vdop: tpv.vdop,
            pdop: tpv.pdop,
            satellites: tpv
                .sorted_satellites()
                .into_iter()
                .map(|sat| SkySatellite {
                    prn: sat.id,
                    el: sat.elevation,
                    az: sat.azimuth,
                    ss: sat.signal_to_noise,
                    used: sat.used,
                })
                .collect(),
        }
    }
}

/// Arguments of `?WATCH=`; unknown keys are accepted and ignored
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchRequest {
    pub enable: Option<bool>,
    pub json: Option<bool>,
    pub raw: Option<u8>,
}

/// A client command line
#[derive(Debug, Clone)]
pub enum Command {
    /// `?WATCH=...`, or `?WATCH;` with no arguments as a status query
    Watch(Option<WatchRequest>),
    Version,
    Devices,
    Unknown(String),
}

/// Parse one client line.
///
/// `Ok(None)` means the line is not a command at all (no leading `?`).
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    let Some(body) = line.strip_prefix('?') else {
        return Ok(None);
    };

    let (name, args) = match body.split_once('=') {
        Some((name, args)) => (name, Some(args.trim_end_matches(';'))),
        None => (body.trim_end_matches(';'), None),
    };

    let command = match (name, args) {
        ("WATCH", Some(args)) => Command::Watch(Some(
            serde_json::from_str(args).map_err(GpsError::Json)?,
        )),
        ("WATCH", None) => Command::Watch(None),
        ("VERSION", _) => Command::Version,
        ("DEVICES", _) => Command::Devices,
        (other, _) => Command::Unknown(other.to_string()),
    };

    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::data::{FixDimension, Satellite};
    use chrono::{NaiveDate, NaiveTime};
    use serde_json::Value;

    fn sample_tpv() -> Tpv {
        let mut tpv = Tpv::new();
        tpv.latitude = Some(48.1173);
        tpv.longitude = Some(-11.516667);
        tpv.altitude_msl = Some(545.4);
        tpv.speed_knots = Some(10.0);
        tpv.track_angle = Some(84.4);
        tpv.hdop = Some(0.9);
        tpv.fix_dimension = Some(FixDimension::ThreeD);
        tpv.date = NaiveDate::from_ymd_opt(2021, 3, 15);
        tpv.time = NaiveTime::from_hms_milli_opt(2, 22, 1, 250);

        let mut sat = Satellite::new(14);
        sat.elevation = Some(22);
        sat.azimuth = Some(228);
        sat.signal_to_noise = Some(45);
        sat.used = true;
        tpv.satellites.insert(14, sat);
        tpv.satellites.insert(3, Satellite::new(3));
        tpv
    }

    #[test]
    fn test_version_line() {
        let line = Report::Version(Version::default()).to_line().unwrap();
        assert!(line.starts_with(r#"{"class":"VERSION","release":""#));
        assert!(line.ends_with("}\n"));

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["proto_major"], 3);
        assert_eq!(value["proto_minor"], 11);
    }

    #[test]
    fn test_tpv_report_round_trip() {
        let tpv = sample_tpv();
        let line = Report::Tpv(TpvReport::from_tpv("/dev/ttyS1", &tpv)).to_line().unwrap();
        assert!(line.starts_with(r#"{"class":"TPV","device":"/dev/ttyS1","mode":3,"time":"2021-03-15T02:22:01.250Z""#));

        let value: Value = serde_json::from_str(&line).unwrap();
        assert!((value["lat"].as_f64().unwrap() - 48.1173).abs() < 1e-9);
        assert!((value["lon"].as_f64().unwrap() + 11.516667).abs() < 1e-9);
        assert!((value["speed"].as_f64().unwrap() - 5.14444).abs() < 1e-6);
        assert!(value.get("epv").is_none());

        let time = DateTime::parse_from_rfc3339(value["time"].as_str().unwrap()).unwrap();
        assert_eq!(time.with_timezone(&Utc), tpv.timestamp().unwrap());
    }

    #[test]
    fn test_tpv_report_without_fix() {
        let report = TpvReport::from_tpv("gps0", &Tpv::new());
        let value: Value = serde_json::to_value(Report::Tpv(report)).unwrap();
        assert_eq!(value["class"], "TPV");
        assert_eq!(value["mode"], 0);
        assert!(value.get("time").is_none());
        assert!(value.get("lat").is_none());
    }

    #[test]
    fn test_sky_report() {
        let tpv = sample_tpv();
        let value: Value = serde_json::to_value(Report::Sky(SkyReport::from_tpv("gps0", &tpv))).unwrap();

        assert_eq!(value["class"], "SKY");
        assert_eq!(value["hdop"], 0.9);
        let sats = value["satellites"].as_array().unwrap();
        assert_eq!(sats.len(), 2);
        assert_eq!(sats[0]["PRN"], 3);
        assert!(sats[0].get("ss").is_none());
        assert_eq!(sats[1]["PRN"], 14);
        assert_eq!(sats[1]["el"], 22);
        assert_eq!(sats[1]["az"], 228);
        assert_eq!(sats[1]["ss"], 45);
        assert_eq!(sats[1]["used"], true);
    }

    #[test]
    fn test_devices_report() {
        let activated = DateTime::parse_from_rfc3339("2021-03-15T02:22:01.163Z")
            .unwrap()
            .with_timezone(&Utc);
        let devices = Devices {
            devices: vec![Device::nmea("/dev/ttyS1", 115200, activated)],
        };
        let line = Report::Devices(devices).to_line().unwrap();
        assert_eq!(
            line,
            "{\"class\":\"DEVICES\",\"devices\":[{\"class\":\"DEVICE\",\"path\":\"/dev/ttyS1\",\
             \"driver\":\"NMEA0183\",\"activated\":\"2021-03-15T02:22:01.163Z\",\"flags\":1,\
             \"native\":0,\"bps\":115200,\"parity\":\"N\",\"stopbits\":1,\"cycle\":1.0}]}\n"
        );
    }

    #[test]
    fn test_parse_watch_command() {
        let cmd = parse_command(r#"?WATCH={"enable":true,"json":true};"#).unwrap();
        match cmd {
            Some(Command::Watch(Some(req))) => {
                assert_eq!(req.enable, Some(true));
                assert_eq!(req.json, Some(true));
                assert_eq!(req.raw, None);
            }
            other => panic!("unexpected {:?}", other),
        }

        let cmd = parse_command(r#"?WATCH={"raw":2,"scaled":true}"#).unwrap();
        assert!(matches!(cmd, Some(Command::Watch(Some(WatchRequest { raw: Some(2), .. })))));

        assert!(matches!(parse_command("?WATCH;").unwrap(), Some(Command::Watch(None))));
    }

    #[test]
    fn test_parse_other_commands() {
        assert!(matches!(parse_command("?VERSION;").unwrap(), Some(Command::Version)));
        assert!(matches!(parse_command("?DEVICES;").unwrap(), Some(Command::Devices)));
        assert!(matches!(parse_command("?POLL;").unwrap(), Some(Command::Unknown(name)) if name == "POLL"));
        assert!(parse_command("hello").unwrap().is_none());
    }

    #[test]
    fn test_invalid_json() {
        let result = parse_command(r#"?WATCH={"enable": json"#);
        assert!(matches!(result, Err(GpsError::Json(_))));
    }
}
