//! Binary framing for sensor readings.
//!
//! Each record on the wire (and in the legacy sensor-data binary file) is
//! the concatenation of a `u16` sensor id, an `f64` value and an `i64`
//! timestamp, in the host's native byte order. There is no length prefix
//! and no framing header; records simply concatenate back to back and a
//! closed connection is the only end-of-stream signal.
//!
//! Host-endian is a portability hazard inherited from the original C
//! implementation (it read these fields with `fread` into a packed
//! struct, with no byte-swapping). We preserve it here rather than
//! switching to a fixed-endian format, since doing so would break wire
//! compatibility with existing sensor clients.

use std::mem::size_of;

/// Size in bytes of one wire record: `u16` + `f64` + `i64`.
pub const RECORD_LEN: usize = size_of::<u16>() + size_of::<f64>() + size_of::<i64>();

/// One `(sensor_id, value, timestamp)` reading produced by a sensor node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub sensor_id: u16,
    pub value: f64,
    pub timestamp: i64,
}

impl SensorReading {
    /// Decode one record from exactly `RECORD_LEN` bytes, host-endian.
    pub fn decode(bytes: &[u8; RECORD_LEN]) -> Self {
        let sensor_id = u16::from_ne_bytes(bytes[0..2].try_into().unwrap());
        let value = f64::from_ne_bytes(bytes[2..10].try_into().unwrap());
        let timestamp = i64::from_ne_bytes(bytes[10..18].try_into().unwrap());
        Self {
            sensor_id,
            value,
            timestamp,
        }
    }

    /// Encode this reading into the wire's host-endian byte layout.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0..2].copy_from_slice(&self.sensor_id.to_ne_bytes());
        out[2..10].copy_from_slice(&self.value.to_ne_bytes());
        out[10..18].copy_from_slice(&self.timestamp.to_ne_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let reading = SensorReading {
            sensor_id: 15,
            value: 20.5,
            timestamp: 1_700_000_000,
        };
        let bytes = reading.encode();
        assert_eq!(bytes.len(), RECORD_LEN);
        assert_eq!(SensorReading::decode(&bytes), reading);
    }

    #[test]
    fn record_len_is_eighteen_bytes() {
        assert_eq!(RECORD_LEN, 18);
    }

    #[test]
    fn negative_timestamp_round_trips() {
        let reading = SensorReading {
            sensor_id: 1,
            value: -40.0,
            timestamp: -1,
        };
        assert_eq!(SensorReading::decode(&reading.encode()), reading);
    }
}
