//! Tab-delimited record decoding.
//!
//! Each input line carries five tab-separated fields:
//! destination type, device id, latitude, longitude, and a comma-separated
//! list of installed app ids.

use crate::error::{DecodeError, MalformedRecordSnafu};

/// Number of tab-separated fields in a well-formed line.
const FIELD_COUNT: usize = 5;

/// One installed-apps event, attributed to its source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Device-identity scheme; selects the destination store.
    pub dest_type: String,
    /// Device identifier within the scheme.
    pub dev_id: String,
    pub lat: f64,
    pub lon: f64,
    /// Installed app ids, in input order. May be empty, never absent.
    pub apps: Vec<u32>,
    /// Originating file, used only for outcome attribution.
    pub source_file: String,
}

impl Record {
    /// Key under which this record is stored: `<dest_type>:<dev_id>`.
    ///
    /// The type prefix makes key collisions across destination types
    /// impossible.
    pub fn key(&self) -> String {
        format!("{}:{}", self.dest_type, self.dev_id)
    }
}

/// Decode one line into a [`Record`].
///
/// The decoder is deliberately permissive about field contents: app-id
/// tokens that fail numeric parsing become 0, and unparseable coordinates
/// become 0.0. Only the field layout itself is validated: a wrong field
/// count or an empty destination type / device id fails the whole line.
pub fn decode_line(line: &str, source_file: &str) -> Result<Record, DecodeError> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() != FIELD_COUNT {
        return MalformedRecordSnafu {
            reason: format!("expected {} fields, got {}", FIELD_COUNT, parts.len()),
        }
        .fail();
    }

    let (dest_type, dev_id, lat, lon, raw_apps) =
        (parts[0], parts[1], parts[2], parts[3], parts[4]);

    if dest_type.is_empty() {
        return MalformedRecordSnafu {
            reason: "empty destination type",
        }
        .fail();
    }
    if dev_id.is_empty() {
        return MalformedRecordSnafu {
            reason: "empty device id",
        }
        .fail();
    }

    let apps = raw_apps
        .split(',')
        .filter(|token| !token.is_empty())
        .map(|token| token.trim().parse::<u32>().unwrap_or(0))
        .collect();

    Ok(Record {
        dest_type: dest_type.to_string(),
        dev_id: dev_id.to_string(),
        lat: lat.parse().unwrap_or(0.0),
        lon: lon.parse().unwrap_or(0.0),
        apps,
        source_file: source_file.to_string(),
    })
}
