// src/gps/nmea.rs
//! NMEA sentence validation and parsing
//!
//! Each line goes through frame validation (checksum, header) first. Frames
//! that fail are ignored, a noisy serial link produces those routinely.
//! Recognized sentences are then decoded into the in-progress [`Tpv`], and the
//! [`CycleSync`] decides when that record is complete.

use super::cycle::CycleSync;
use super::data::{FaaMode, FixDimension, FixQuality, Tpv};
use super::util::{nmea_coord_to_dec_deg, parse_opt};
use chrono::{NaiveDate, NaiveTime};
use log::{debug, info};
use std::{collections::VecDeque, fmt, time::Instant};

/// Field-level decode failure inside a recognized sentence
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    MissingField {
        sentence: &'static str,
        index: usize,
    },
    InvalidField {
        sentence: &'static str,
        field: &'static str,
        value: String,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingField { sentence, index } => {
                write!(f, "{} sentence is missing field {}", sentence, index)
            }
            ParseError::InvalidField { sentence, field, value } => {
                write!(f, "{} sentence has invalid {}: {:?}", sentence, field, value)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Why a line was dropped before decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoChecksum,
    NoStartMarker,
    BadChecksum { expected: u8, reported: u8 },
    BadHeader,
    Unrecognized,
}

/// Sentence types the parser decodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentenceKind {
    Rmc,
    Gga,
    Gsa,
    Gsv,
}

impl SentenceKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "RMC" => Some(SentenceKind::Rmc),
            "GGA" => Some(SentenceKind::Gga),
            "GSA" => Some(SentenceKind::Gsa),
            "GSV" => Some(SentenceKind::Gsv),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentenceKind::Rmc => "RMC",
            SentenceKind::Gga => "GGA",
            SentenceKind::Gsa => "GSA",
            SentenceKind::Gsv => "GSV",
        }
    }

    /// Apply the sentence's fields to `tpv`
    pub fn decode(&self, tpv: &mut Tpv, fields: &[&str]) -> Result<(), ParseError> {
        match self {
            SentenceKind::Rmc => parse_rmc(tpv, fields),
            SentenceKind::Gga => parse_gga(tpv, fields),
            SentenceKind::Gsa => parse_gsa(tpv, fields),
            SentenceKind::Gsv => parse_gsv(tpv, fields),
        }
    }
}

impl fmt::Display for SentenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checksum-valid sentence split into header and data fields
#[derive(Debug, PartialEq)]
pub struct Frame<'a> {
    pub talker: &'a str,
    pub sentence_type: &'a str,
    /// Comma separated fields after the header
    pub fields: Vec<&'a str>,
}

/// XOR of every byte between `$` and `*`
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Validate framing and checksum, then split the header off
pub fn validate_frame(line: &str) -> Result<Frame<'_>, Rejection> {
    let line = line.trim();

    let (message, reported) = line.split_once('*').ok_or(Rejection::NoChecksum)?;
    if reported.contains('*') {
        return Err(Rejection::NoChecksum);
    }
    let body = message.strip_prefix('$').ok_or(Rejection::NoStartMarker)?;

    if reported.len() != 2 {
        return Err(Rejection::NoChecksum);
    }
    let reported = u8::from_str_radix(reported, 16).map_err(|_| Rejection::NoChecksum)?;
    let expected = checksum(body);
    if expected != reported {
        return Err(Rejection::BadChecksum { expected, reported });
    }

    let mut parts = body.split(',');
    let header = parts.next().unwrap_or_default();
    if header.len() != 5 || !header.is_ascii() {
        return Err(Rejection::BadHeader);
    }
    let (talker, sentence_type) = header.split_at(2);

    Ok(Frame {
        talker,
        sentence_type,
        fields: parts.collect(),
    })
}

/// Result of feeding one line to the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted(SentenceKind),
    Ignored(Rejection),
}

/// Stateful parser for one receiver.
///
/// Completed fixes queue up internally and are collected with
/// [`NmeaParser::take_completed`].
pub struct NmeaParser {
    source: String,
    log_target: String,
    sync: CycleSync,
    incoming: Tpv,
    completed: VecDeque<Tpv>,
}

impl NmeaParser {
    /// `source` names the receiver; it also becomes the log target suffix
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            log_target: format!("nmea::{}", source),
            source,
            sync: CycleSync::new(),
            incoming: Tpv::new(),
            completed: VecDeque::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn log_target(&self) -> &str {
        &self.log_target
    }

    pub fn parse(&mut self, line: &str) -> Result<Outcome, ParseError> {
        self.parse_at(line, Instant::now())
    }

    /// Parse `line` as if it arrived at `now`.
    ///
    /// Field errors leave whatever this cycle already collected in place;
    /// the caller decides how to report them.
    pub fn parse_at(&mut self, line: &str, now: Instant) -> Result<Outcome, ParseError> {
        let target = self.log_target.as_str();
        let line = line.trim();

        let frame = match validate_frame(line) {
            Ok(frame) => frame,
            Err(rejection) => {
                debug!(target: target, "Dropping {:?}: {}", rejection, line);
                return Ok(Outcome::Ignored(rejection));
            }
        };

        let Some(kind) = SentenceKind::from_tag(frame.sentence_type) else {
            debug!(target: target, "Unhandled sentence {}{}", frame.talker, frame.sentence_type);
            self.incoming.sentences.push(line.to_string());
            return Ok(Outcome::Ignored(Rejection::Unrecognized));
        };

        let was_locked = self.sync.boundary().is_some();
        if self.sync.observe(kind, now) {
            if !was_locked {
                info!(target: target, "Locked onto {} as the first sentence of each cycle", kind);
            }
            self.flush();
        }

        self.incoming.sentences.push(line.to_string());
        kind.decode(&mut self.incoming, &frame.fields)?;

        Ok(Outcome::Accepted(kind))
    }

    fn flush(&mut self) {
        let done = std::mem::take(&mut self.incoming);
        if done.gsv_census_complete() == Some(false) {
            let (seen, expected) = done.gsv_census();
            debug!(
                target: self.log_target.as_str(),
                "Publishing fix with {}/{} GSV messages",
                seen,
                expected.unwrap_or_default()
            );
        }
        debug!(target: self.log_target.as_str(), "{}", done);
        self.completed.push_back(done);
    }

    /// Pop the oldest completed fix
    pub fn take_completed(&mut self) -> Option<Tpv> {
        self.completed.pop_front()
    }

    /// Sentence type that starts each cycle, once locked
    pub fn boundary(&self) -> Option<SentenceKind> {
        self.sync.boundary()
    }

    pub fn in_progress(&self) -> &Tpv {
        &self.incoming
    }
}

fn field<'a>(fields: &[&'a str], sentence: &'static str, index: usize) -> Result<&'a str, ParseError> {
    fields
        .get(index)
        .copied()
        .ok_or(ParseError::MissingField { sentence, index })
}

fn invalid(sentence: &'static str, name: &'static str, value: &str) -> ParseError {
    ParseError::InvalidField {
        sentence,
        field: name,
        value: value.to_string(),
    }
}

/// hhmmss with optional fractional seconds
fn parse_time(sentence: &'static str, value: &str) -> Result<NaiveTime, ParseError> {
    let err = || invalid(sentence, "time", value);
    let (whole, frac) = value.split_once('.').unwrap_or((value, ""));
    if whole.len() != 6 || !whole.is_ascii() {
        return Err(err());
    }

    let hour: u32 = whole[0..2].parse().map_err(|_| err())?;
    let min: u32 = whole[2..4].parse().map_err(|_| err())?;
    let sec: u32 = whole[4..6].parse().map_err(|_| err())?;
    let milli: u32 = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().chain("000".chars()).take(3).collect();
        digits.parse().map_err(|_| err())?
    };

    NaiveTime::from_hms_milli_opt(hour, min, sec, milli).ok_or_else(err)
}

/// ddmmyy, years are taken as 20yy
fn parse_date(sentence: &'static str, value: &str) -> Result<NaiveDate, ParseError> {
    let err = || invalid(sentence, "date", value);
    if value.len() != 6 || !value.is_ascii() {
        return Err(err());
    }

    let day: u32 = value[0..2].parse().map_err(|_| err())?;
    let month: u32 = value[2..4].parse().map_err(|_| err())?;
    let year: i32 = value[4..6].parse().map_err(|_| err())?;

    NaiveDate::from_ymd_opt(2000 + year, month, day).ok_or_else(err)
}

fn parse_position(
    tpv: &mut Tpv,
    sentence: &'static str,
    fields: &[&str],
    start: usize,
) -> Result<(), ParseError> {
    let lat = field(fields, sentence, start)?;
    let ns = field(fields, sentence, start + 1)?;
    let lon = field(fields, sentence, start + 2)?;
    let ew = field(fields, sentence, start + 3)?;

    if lat.is_empty() || lon.is_empty() {
        return Ok(());
    }

    // Both halves or neither
    let latitude = nmea_coord_to_dec_deg(lat, ns).ok_or_else(|| invalid(sentence, "latitude", lat))?;
    let longitude = nmea_coord_to_dec_deg(lon, ew).ok_or_else(|| invalid(sentence, "longitude", lon))?;
    tpv.latitude = Some(latitude);
    tpv.longitude = Some(longitude);
    Ok(())
}

/// Empty is absent, anything else has to parse
fn parse_dop(sentence: &'static str, name: &'static str, value: Option<&str>) -> Result<Option<f64>, ParseError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v.parse().map(Some).map_err(|_| invalid(sentence, name, v)),
    }
}

/// RMC (Recommended Minimum Navigation Information)
fn parse_rmc(tpv: &mut Tpv, fields: &[&str]) -> Result<(), ParseError> {
    const S: &str = "RMC";

    let time = field(fields, S, 0)?;
    if !time.is_empty() {
        tpv.time = Some(parse_time(S, time)?);
    }

    tpv.status_warning = Some(field(fields, S, 1)? != "A");

    parse_position(tpv, S, fields, 2)?;

    if let Some(speed) = parse_opt(field(fields, S, 6)?) {
        tpv.speed_knots = Some(speed);
    }
    if let Some(track) = parse_opt(field(fields, S, 7)?) {
        tpv.track_angle = Some(track);
    }

    let date = field(fields, S, 8)?;
    if !date.is_empty() {
        tpv.date = Some(parse_date(S, date)?);
    }

    // Magnetic variation and its direction
    if let (Some(var), Some(dir)) = (fields.get(9).and_then(|v| parse_opt::<f64>(v)), fields.get(10)) {
        tpv.magnetic_variation = match dir.trim() {
            "E" => Some(var),
            "W" => Some(-var),
            _ => None,
        };
    }

    // FAA mode only exists from NMEA 2.3 on
    if let Some(mode) = fields.get(11) {
        tpv.faa_mode = Some(FaaMode::from_code(mode));
    }

    Ok(())
}

/// GGA (Global Positioning System Fix Data)
fn parse_gga(tpv: &mut Tpv, fields: &[&str]) -> Result<(), ParseError> {
    const S: &str = "GGA";

    let time = field(fields, S, 0)?;
    if !time.is_empty() {
        tpv.time = Some(parse_time(S, time)?);
    }

    parse_position(tpv, S, fields, 1)?;

    tpv.fix_quality = Some(FixQuality::from_code(field(fields, S, 5)?));

    let altitude: Option<f64> = parse_opt(field(fields, S, 8)?);
    if altitude.is_some() {
        tpv.altitude_msl = altitude;
    }

    // Geoid separation: ellipsoid height is MSL altitude plus separation
    let separation: Option<f64> = fields.get(10).and_then(|v| parse_opt(v));
    if let (Some(alt), Some(sep)) = (altitude, separation) {
        tpv.height_above_ellipsoid = Some(alt + sep);
    }

    Ok(())
}

/// GSA (DOP and active satellites)
fn parse_gsa(tpv: &mut Tpv, fields: &[&str]) -> Result<(), ParseError> {
    const S: &str = "GSA";

    tpv.forced_mode = Some(field(fields, S, 0)? == "M");
    tpv.fix_dimension = Some(FixDimension::from_code(field(fields, S, 1)?));

    let ids_end = fields.len().min(14);
    for id in fields.get(2..ids_end).unwrap_or_default() {
        if let Some(id) = parse_opt::<u16>(id) {
            tpv.satellite_mut(id).used = true;
        }
    }

    if let Some(pdop) = parse_dop(S, "pdop", fields.get(14).copied())? {
        tpv.pdop = Some(pdop);
    }
    if let Some(hdop) = parse_dop(S, "hdop", fields.get(15).copied())? {
        tpv.hdop = Some(hdop);
    }
    if let Some(vdop) = parse_dop(S, "vdop", fields.get(16).copied())? {
        tpv.vdop = Some(vdop);
    }

    Ok(())
}

/// GSV (Satellites in view)
fn parse_gsv(tpv: &mut Tpv, fields: &[&str]) -> Result<(), ParseError> {
    const S: &str = "GSV";

    let total = parse_opt(field(fields, S, 0)?);
    let index = parse_opt(field(fields, S, 1)?);
    tpv.record_gsv(total, index);

    if let Some(in_view) = parse_opt(field(fields, S, 2)?) {
        tpv.satellites_in_view = Some(in_view);
    }

    for block in fields[3..].chunks(4) {
        let id = parse_opt::<u16>(block[0]);
        let elevation = block.get(1).and_then(|v| parse_opt::<i16>(v));
        let azimuth = block.get(2).and_then(|v| parse_opt::<u16>(v));
        let (Some(id), Some(elevation), Some(azimuth)) = (id, elevation, azimuth) else {
            continue;
        };

        let sat = tpv.satellite_mut(id);
        sat.elevation = Some(elevation);
        sat.azimuth = Some(azimuth);
        sat.signal_to_noise = block.get(3).and_then(|v| parse_opt(v));
    }

    Ok(())
}
