mod buffer;
mod config;
mod connmgr;
mod datamgr;
mod gateway;
mod log;
mod map;
mod storage;
mod wire;

use std::process::ExitCode;

use anyhow::Context;

use config::Config;
use log::LogChannel;

fn main() -> ExitCode {
    tracing_subscriber::fmt::try_init().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let port = match Config::parse_port(&args) {
        Ok(Some(port)) => port,
        Ok(None) => {
            println!("usage: sensor-gateway PORT");
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("sensor-gateway: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = run(port) {
        eprintln!("sensor-gateway: {err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(port: u16) -> anyhow::Result<()> {
    let config = Config::from_env(port).context("failed to assemble configuration")?;
    let room_map = map::parse_sensor_map(&config.map_path)
        .with_context(|| format!("failed to parse sensor map {:?}", config.map_path))?;
    let log = LogChannel::open(&config.log_path, config.log_length)
        .with_context(|| format!("failed to open log file {:?}", config.log_path))?;

    gateway::run(config, room_map, log)
}
