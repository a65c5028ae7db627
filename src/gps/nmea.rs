// src/gps/nmea.rs
//! NMEA sentence decoding
//!
//! [`decode`] turns one line of receiver output into a [`RawSentence`]. It never
//! panics: serial input is noisy, so every failure comes back as a
//! [`DecodeError`] and the caller decides what to do with it.

use crate::error::DecodeError;
use std::fmt;

/// Constellation prefix of a sentence address (`GN` in `$GNGGA`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Talker {
    Gps,
    Glonass,
    Galileo,
    Beidou,
    Qzss,
    Navic,
    Combined,
}

impl Talker {
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "GP" => Some(Talker::Gps),
            "GL" => Some(Talker::Glonass),
            "GA" => Some(Talker::Galileo),
            "GB" | "BD" => Some(Talker::Beidou),
            "GQ" => Some(Talker::Qzss),
            "GI" => Some(Talker::Navic),
            "GN" => Some(Talker::Combined),
            _ => None,
        }
    }
}

/// Sentence formatter (`GGA` in `$GNGGA`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SentenceType {
    /// Global positioning system fix data
    Gga,
    /// Recommended minimum navigation information
    Rmc,
    /// DOP and active satellites
    Gsa,
    /// Satellites in view
    Gsv,
    /// Track made good and ground speed
    Vtg,
    /// Geographic position, latitude/longitude
    Gll,
    /// Time and date
    Zda,
    /// Pseudorange error statistics
    Gst,
    /// Text transmission
    Txt,
    Other(String),
}

impl SentenceType {
    fn from_formatter(formatter: &str) -> Self {
        match formatter {
            "GGA" => SentenceType::Gga,
            "RMC" => SentenceType::Rmc,
            "GSA" => SentenceType::Gsa,
            "GSV" => SentenceType::Gsv,
            "VTG" => SentenceType::Vtg,
            "GLL" => SentenceType::Gll,
            "ZDA" => SentenceType::Zda,
            "GST" => SentenceType::Gst,
            "TXT" => SentenceType::Txt,
            other => SentenceType::Other(other.to_string()),
        }
    }

    /// Allowed number of data fields (excluding the address field).
    ///
    /// Ranges cover the optional trailing fields added by NMEA 2.3 and 4.1.
    pub fn field_count(&self) -> Option<(usize, usize)> {
        match self {
            SentenceType::Gga => Some((14, 14)),
            SentenceType::Rmc => Some((11, 13)),
            SentenceType::Gsa => Some((17, 18)),
            SentenceType::Gsv => Some((3, 20)),
            SentenceType::Vtg => Some((8, 9)),
            SentenceType::Gll => Some((6, 7)),
            SentenceType::Zda => Some((6, 6)),
            SentenceType::Gst => Some((8, 8)),
            SentenceType::Txt => Some((4, 4)),
            SentenceType::Other(_) => None,
        }
    }
}

impl fmt::Display for SentenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SentenceType::Gga => "GGA",
            SentenceType::Rmc => "RMC",
            SentenceType::Gsa => "GSA",
            SentenceType::Gsv => "GSV",
            SentenceType::Vtg => "VTG",
            SentenceType::Gll => "GLL",
            SentenceType::Zda => "ZDA",
            SentenceType::Gst => "GST",
            SentenceType::Txt => "TXT",
            SentenceType::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// One decoded NMEA line
#[derive(Debug, Clone, PartialEq)]
pub struct RawSentence {
    pub talker: Talker,
    pub sentence_type: SentenceType,
    /// Data fields after the address, checksum stripped
    pub fields: Vec<String>,
    /// False when the line carried no `*hh` checksum at all
    pub checksum_valid: bool,
}

impl RawSentence {
    /// Non-empty field at `index`
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields
            .get(index)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Numeric field; anything that doesn't parse is unknown
    pub fn f64_field(&self, index: usize) -> Option<f64> {
        self.field(index)
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| value.is_finite())
    }

    pub fn u8_field(&self, index: usize) -> Option<u8> {
        self.field(index).and_then(|value| value.parse::<u8>().ok())
    }

    /// Latitude or longitude from a `ddmm.mmmm` value and its hemisphere field
    pub fn coordinate(&self, value_index: usize, hemisphere_index: usize) -> Option<f64> {
        parse_coordinate(self.field(value_index)?, self.field(hemisphere_index)?)
    }
}

/// XOR of every byte between `$` and `*`
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, byte| acc ^ byte)
}

/// Wrap a sentence body (`GNGGA,...`, no `$`) with its framing and checksum
pub fn format_sentence(body: &str) -> String {
    format!("${}*{:02X}", body, checksum(body))
}

/// Decode raw bytes from the serial line; invalid UTF-8 is replaced, not rejected
pub fn decode_bytes(bytes: &[u8]) -> Result<RawSentence, DecodeError> {
    decode(&String::from_utf8_lossy(bytes))
}

/// Decode a single NMEA line
pub fn decode(line: &str) -> Result<RawSentence, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(DecodeError::EmptyLine);
    }

    // A line glued to the tail of a partial one starts at the last '$'
    let start = line
        .rfind('$')
        .ok_or_else(|| DecodeError::UnknownTalker(address_hint(line)))?;
    let sentence = &line[start + 1..];
    if sentence.is_empty() {
        return Err(DecodeError::EmptyLine);
    }

    let (body, checksum_valid) = match sentence.rfind('*') {
        Some(star) => {
            let body = &sentence[..star];
            let found = sentence[star + 1..].trim();
            let computed = checksum(body);
            let matches = found.len() == 2
                && u8::from_str_radix(found, 16).map_or(false, |value| value == computed);
            if !matches {
                return Err(DecodeError::ChecksumMismatch {
                    found: found.to_string(),
                    computed,
                });
            }
            (body, true)
        }
        None => (sentence, false),
    };

    let mut parts = body.split(',');
    let address = parts.next().unwrap_or_default();
    if address.len() < 5 || !address.is_char_boundary(2) || !address.is_ascii() {
        return Err(DecodeError::UnknownTalker(address.to_string()));
    }
    let talker = Talker::from_prefix(&address[..2])
        .ok_or_else(|| DecodeError::UnknownTalker(address.to_string()))?;
    let sentence_type = SentenceType::from_formatter(&address[2..]);

    let fields: Vec<String> = parts.map(str::to_string).collect();
    if let Some((min, max)) = sentence_type.field_count() {
        if fields.len() < min || fields.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{}..={}", min, max)
            };
            return Err(DecodeError::MalformedFieldCount {
                sentence: address.to_string(),
                expected,
                found: fields.len(),
            });
        }
    }

    Ok(RawSentence {
        talker,
        sentence_type,
        fields,
        checksum_valid,
    })
}

/// Parse NMEA `ddmm.mmmm` / `dddmm.mmmm` into signed decimal degrees
pub fn parse_coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    let sign = match hemisphere {
        "N" | "E" => 1.0,
        "S" | "W" => -1.0,
        _ => return None,
    };
    if !value.is_ascii() {
        return None;
    }

    let dot = value.find('.').unwrap_or(value.len());
    if dot < 3 {
        return None;
    }
    let degrees: f64 = value[..dot - 2].parse().ok()?;
    let minutes: f64 = value[dot - 2..].parse().ok()?;
    if !(0.0..60.0).contains(&minutes) {
        return None;
    }

    let decimal = degrees + minutes / 60.0;
    let limit = if matches!(hemisphere, "N" | "S") { 90.0 } else { 180.0 };
    if decimal > limit {
        return None;
    }
    Some(sign * decimal)
}

fn address_hint(line: &str) -> String {
    line.split(',').next().unwrap_or_default().chars().take(8).collect()
}
