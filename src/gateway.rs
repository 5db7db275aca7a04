//! Gateway Orchestrator: brings the producer and the two consumers up
//! and down in the right order.
//!
//! State machine (one-way transitions):
//!
//! - **Starting**: spawn the Storage Manager, wait on the startup
//!   barrier.
//! - **Ready** (barrier released with `initialised = true`): spawn the
//!   Connection Manager and Data Manager.
//! - **Draining** (Connection Manager's loop returns — session
//!   expired): terminate the buffer, join the Data Manager.
//! - **Stopped**: join the Storage Manager, return.
//! - **Aborted** (barrier released with `initialised = false`): skip
//!   straight to **Stopped**.
//!
//! The barrier is a two-party rendezvous between this function and the
//! Storage Manager thread: it is the mechanism by which SQL
//! availability gates producer startup, not an ordinary join.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use crate::buffer::SharedBuffer;
use crate::config::Config;
use crate::connmgr;
use crate::datamgr;
use crate::log::LogChannel;
use crate::storage;

/// Run the gateway to completion: blocks until the session ends, either
/// because the SQL connection could never be established (Aborted) or
/// because the Connection Manager's session expired and both consumers
/// have drained (Stopped).
pub fn run(config: Config, room_map: HashMap<u16, u16>, log: LogChannel) -> anyhow::Result<()> {
    let listener = connmgr::bind(config.port)?;

    let buffer = Arc::new(SharedBuffer::new());
    let config = Arc::new(config);
    let room_map = Arc::new(room_map);
    let barrier = Arc::new(Barrier::new(2));
    let initialised = Arc::new(AtomicBool::new(false));

    // Starting: the storage manager either becomes the sole owner of a
    // SQL connection and enters its consume loop, or exhausts its
    // attempt budget and exits immediately after releasing the
    // rendezvous. Either way it calls `barrier.wait()` exactly once.
    let storage_handle = {
        let config = Arc::clone(&config);
        let buffer = Arc::clone(&buffer);
        let log = log.clone();
        let barrier = Arc::clone(&barrier);
        let initialised = Arc::clone(&initialised);
        thread::spawn(move || match storage::open(&config, &log) {
            Some(conn) => {
                initialised.store(true, Ordering::SeqCst);
                barrier.wait();
                storage::run(&conn, &buffer, &config, &log);
            }
            None => {
                barrier.wait();
            }
        })
    };

    barrier.wait();

    if !initialised.load(Ordering::SeqCst) {
        log.log("Gateway aborted: SQL connection could not be established");
        storage_handle
            .join()
            .expect("storage manager thread panicked");
        return Ok(());
    }

    // Ready: the producer and the other consumer only ever start once
    // storage is known-good.
    let connmgr_handle = {
        let buffer = Arc::clone(&buffer);
        let log = log.clone();
        let timeout = config.timeout;
        thread::spawn(move || connmgr::run(listener, timeout, &buffer, &log))
    };
    let datamgr_handle = {
        let buffer = Arc::clone(&buffer);
        let room_map = Arc::clone(&room_map);
        let config = Arc::clone(&config);
        let log = log.clone();
        thread::spawn(move || datamgr::run(&buffer, &room_map, &config, &log))
    };

    let connmgr_result = connmgr_handle
        .join()
        .expect("connection manager thread panicked");
    if let Err(err) = connmgr_result {
        log.log(&format!("Connection manager exited with error: {err}"));
    }

    // Draining: no more readings can ever arrive, so both consumers can
    // be released to run out the buffer and stop.
    buffer.terminate();
    datamgr_handle.join().expect("data manager thread panicked");

    // Stopped.
    storage_handle
        .join()
        .expect("storage manager thread panicked");

    Ok(())
}
