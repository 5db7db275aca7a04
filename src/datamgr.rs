//! Data Manager: the first consumer of the shared buffer.
//!
//! Reads every sensor reading non-destructively (so the storage manager
//! is always free to catch up independently), maintains a running
//! average per sensor over the last `run_avg_length` values, and emits
//! threshold alerts. There is no debouncing: an alert fires on every
//! reading for as long as the window's average stays outside bounds.

use std::collections::HashMap;

use crate::buffer::{Cursor, SharedBuffer};
use crate::config::Config;
use crate::log::LogChannel;
use crate::wire::SensorReading;

/// Per-sensor running-average state.
struct SensorAverageState {
    #[allow(dead_code)]
    room_id: u16,
    window: Vec<f64>,
    running_index: usize,
    full: bool,
    #[allow(dead_code)]
    last_modified: i64,
}

impl SensorAverageState {
    fn new(room_id: u16, run_avg_length: usize) -> Self {
        Self {
            room_id,
            window: vec![0.0; run_avg_length],
            running_index: 0,
            full: false,
            last_modified: 0,
        }
    }

    /// Insert `value` at the running index, advance it modulo the window
    /// length, and report the updated arithmetic mean over the valid
    /// window (capped at the window length once it has wrapped once).
    fn push(&mut self, value: f64, timestamp: i64) -> f64 {
        self.last_modified = timestamp;
        self.window[self.running_index] = value;
        let written = self.running_index + 1;
        self.running_index += 1;
        if self.running_index == self.window.len() {
            self.running_index = 0;
            self.full = true;
        }

        let divisor = if self.full { self.window.len() } else { written };
        let sum: f64 = self.window.iter().sum();
        sum / divisor as f64
    }
}

/// Runs the data manager's consume loop until the buffer terminates and
/// drains. `room_map` is `sensor_id -> room_id`, parsed ahead of time by
/// `crate::map::parse_sensor_map`.
pub fn run(
    buffer: &SharedBuffer,
    room_map: &HashMap<u16, u16>,
    config: &Config,
    log: &LogChannel,
) {
    let mut states: HashMap<u16, SensorAverageState> = room_map
        .iter()
        .map(|(&sensor_id, &room_id)| (sensor_id, SensorAverageState::new(room_id, config.run_avg_length)))
        .collect();

    loop {
        if !buffer.wait_not_empty(Cursor::Mid) {
            break;
        }
        let Some(reading) = buffer.read() else {
            continue;
        };
        process_reading(&mut states, reading, config, log);
    }
}

fn process_reading(
    states: &mut HashMap<u16, SensorAverageState>,
    reading: SensorReading,
    config: &Config,
    log: &LogChannel,
) {
    let Some(state) = states.get_mut(&reading.sensor_id) else {
        log.log(&format!(
            "Received sensor data with invalid sensor node ID {}",
            reading.sensor_id
        ));
        return;
    };

    let running_avg = state.push(reading.value, reading.timestamp);

    if running_avg < config.set_min_temp {
        log.log(&format!(
            "The sensor node with {} reports it's too cold (running avg temperature = {running_avg:.3})",
            reading.sensor_id
        ));
    }
    if running_avg > config.set_max_temp {
        log.log(&format!(
            "The sensor node with {} reports it's too hot (running avg temperature = {running_avg:.3})",
            reading.sensor_id
        ));
    }
}
