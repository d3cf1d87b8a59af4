// src/gps/util.rs
//! Coordinate conversion and tolerant numeric parsing

use std::str::FromStr;

/// Convert an NMEA `DDDMM.MMMM` coordinate and its hemisphere letter into
/// signed decimal degrees. South and West are negative.
///
/// Returns `None` when the coordinate has no decimal point, the degree or
/// minute part is not numeric, or the hemisphere is not one of `N/S/E/W`.
///
/// ```
/// use nmea_gpsd::gps::util::nmea_coord_to_dec_deg;
///
/// let lon = nmea_coord_to_dec_deg("07250.1234", "E").unwrap();
/// assert!((lon - 72.835390).abs() < 1e-6);
/// ```
pub fn nmea_coord_to_dec_deg(coord: &str, hemisphere: &str) -> Option<f64> {
    let coord = coord.trim();
    // Byte offsets below are only char boundaries for ASCII
    if !coord.is_ascii() {
        return None;
    }
    let dot = coord.find('.')?;
    // Minutes always carry two integer digits
    let min_idx = dot.checked_sub(2)?;

    let degrees: f64 = if min_idx == 0 {
        0.0
    } else {
        coord[..min_idx].parse::<u16>().ok()? as f64
    };
    let minutes: f64 = coord[min_idx..].parse().ok()?;
    if !(0.0..60.0).contains(&minutes) {
        return None;
    }

    let sign = match hemisphere.trim().to_ascii_uppercase().as_str() {
        "N" | "E" => 1.0,
        "S" | "W" => -1.0,
        _ => return None,
    };

    Some((degrees + minutes / 60.0) * sign)
}

/// Parse a field, yielding `None` for empty or malformed input instead of failing.
pub fn parse_opt<T: FromStr>(field: &str) -> Option<T> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    field.parse().ok()
}
