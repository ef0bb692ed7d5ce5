//! Protobuf value encoding.
//!
//! The destination stores expect the same wire value the rest of the
//! installed-apps fleet produces: a `UserApps` protobuf message. The
//! message shape is fixed; fields are hand-declared rather than generated
//! from a schema file.

use prost::Message;

use crate::record::Record;

/// Wire value stored under `<dest_type>:<dev_id>`.
#[derive(Clone, PartialEq, Message)]
pub struct UserApps {
    #[prost(uint32, repeated, tag = "1")]
    pub apps: Vec<u32>,
    #[prost(double, optional, tag = "2")]
    pub lat: Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub lon: Option<f64>,
}

impl From<&Record> for UserApps {
    fn from(record: &Record) -> Self {
        Self {
            apps: record.apps.clone(),
            lat: Some(record.lat),
            lon: Some(record.lon),
        }
    }
}

/// Encode a record's payload to its wire value.
pub fn encode_value(record: &Record) -> Vec<u8> {
    UserApps::from(record).encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::decode_line;

    #[test]
    fn test_round_trip_preserves_payload() {
        let record = decode_line("idfa\tdev-1\t55.75\t37.61\t1,2,3", "f.tsv.gz").unwrap();
        let bytes = encode_value(&record);
        let decoded = UserApps::decode(&bytes[..]).unwrap();
        assert_eq!(decoded.apps, vec![1, 2, 3]);
        assert_eq!(decoded.lat, Some(55.75));
        assert_eq!(decoded.lon, Some(37.61));
    }

    #[test]
    fn test_empty_apps_encodes() {
        let record = decode_line("gaid\tdev-2\t0\t0\t", "f.tsv.gz").unwrap();
        let bytes = encode_value(&record);
        let decoded = UserApps::decode(&bytes[..]).unwrap();
        assert!(decoded.apps.is_empty());
    }
}
