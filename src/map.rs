//! Parses the sensor→room map file: one `"room_id sensor_id"` pair per
//! line, whitespace separated. Sensors not present in this map are
//! accepted on the wire but rejected by the data manager with a log
//! warning (see `datamgr`).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to read sensor map {path:?}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed line {line_no} in sensor map: {line:?}")]
    BadLine { line_no: usize, line: String },
}

/// Parse a sensor→room map file into `sensor_id -> room_id`.
pub fn parse_sensor_map(path: impl AsRef<Path>) -> Result<HashMap<u16, u16>, MapError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| MapError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let mut map = HashMap::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let room_id = parts.next().and_then(|s| s.parse::<u16>().ok());
        let sensor_id = parts.next().and_then(|s| s.parse::<u16>().ok());
        match (room_id, sensor_id, parts.next()) {
            (Some(room_id), Some(sensor_id), None) => {
                map.insert(sensor_id, room_id);
            }
            _ => {
                return Err(MapError::BadLine {
                    line_no: idx + 1,
                    line: line.to_string(),
                });
            }
        }
    }
    Ok(map)
}
