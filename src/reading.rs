use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single sensor sample. Has no identity until the store assigns one.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
}

/// A reading as persisted, carrying the store-assigned id.
///
/// This is also the shape written to the latest-reading cache and returned by
/// the read API (`{id, temperature, humidity, timestamp}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredReading {
    pub id: i64,
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
}

impl StoredReading {
    pub fn reading(&self) -> Reading {
        Reading {
            temperature: self.temperature,
            humidity: self.humidity,
            timestamp: self.timestamp,
        }
    }
}

/// Alert published when a reading breaches a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub message: String,
}

impl AlertEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] simd_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawReading {
    temperature: f64,
    humidity: f64,
}

/// Decodes an inbound reading message.
///
/// `temperature` and `humidity` are required numbers; any other field is
/// ignored. The reading is always stamped with `received_at`.
pub fn parse_reading_payload(
    payload: &mut [u8],
    received_at: DateTime<Utc>,
) -> Result<Reading, PayloadError> {
    let raw: RawReading = simd_json::serde::from_slice(payload)?;
    Ok(Reading {
        temperature: raw.temperature,
        humidity: raw.humidity,
        timestamp: received_at,
    })
}

pub fn parse_alert_payload(payload: &mut [u8]) -> Result<AlertEvent, PayloadError> {
    Ok(simd_json::serde::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 29, 10, 0, 0).unwrap()
    }

    #[test]
    fn parses_minimal_reading_and_stamps_receive_time() {
        let mut payload = br#"{"temperature": 30.0, "humidity": 50}"#.to_vec();
        let reading = parse_reading_payload(&mut payload, received_at()).expect("reading");
        assert_eq!(reading.temperature, 30.0);
        assert_eq!(reading.humidity, 50.0);
        assert_eq!(reading.timestamp, received_at());
    }

    #[test]
    fn payload_timestamps_are_ignored() {
        for raw in [
            &br#"{"temperature":22.0,"humidity":50.0,"timestamp":1748513100}"#[..],
            &br#"{"temperature":22.0,"humidity":50.0,"timestamp":"2999-01-01T00:00:00Z"}"#[..],
            &br#"{"temperature":22.0,"humidity":50.0,"timestamp":"yesterday"}"#[..],
        ] {
            let mut payload = raw.to_vec();
            let reading = parse_reading_payload(&mut payload, received_at()).expect("reading");
            assert_eq!(reading.timestamp, received_at());
        }
    }

    #[test]
    fn rejects_malformed_payloads() {
        for raw in [
            &b"invalid json"[..],
            &br#"{"temperature": 22.0}"#[..],
            &br#"{"temperature": "hot", "humidity": 50.0}"#[..],
            &b"42"[..],
        ] {
            let mut payload = raw.to_vec();
            assert!(
                parse_reading_payload(&mut payload, received_at()).is_err(),
                "accepted {:?}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn parses_alert_events() {
        let mut payload = r#"{"message":"Temperature out of range: 30.0°C"}"#
            .as_bytes()
            .to_vec();
        let event = parse_alert_payload(&mut payload).unwrap();
        assert_eq!(event.message, "Temperature out of range: 30.0°C");

        let mut bad = br#"{"msg":"x"}"#.to_vec();
        assert!(parse_alert_payload(&mut bad).is_err());
    }

    #[test]
    fn stored_reading_serializes_with_iso_timestamp() {
        let stored = StoredReading {
            id: 7,
            temperature: 20.5,
            humidity: 40.0,
            timestamp: received_at(),
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["timestamp"], "2025-05-29T10:00:00Z");
    }
}
