//! Shared helpers: a board facade connected to a simulated board
#![allow(dead_code)]

use isotope_core::prelude::*;
use std::time::{Duration, Instant};

/// Config tuned for fast tests
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        address: "sim".to_string(),
        response_timeout_ms: 500,
        heartbeat_interval_ms: 100,
        reader_poll_interval_ms: 2,
        busy_poll_delay_ms: 100,
        ..Default::default()
    }
}

/// Connected board plus the handle steering the simulator behind it
pub fn connected_with(config: ConnectionConfig) -> (Isotope, SimulatedBoardHandle) {
    isotope_core::logging::init_for_tests();
    let (sim, handle) = SimulatedBoard::new();
    let mut board = Isotope::new(config);
    board
        .connect_with_channel(Box::new(sim))
        .expect("connect to simulated board");
    handle.clear_commands();
    (board, handle)
}

pub fn connected() -> (Isotope, SimulatedBoardHandle) {
    connected_with(test_config())
}

/// Poll `check` until it holds or `timeout` passes
pub fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}
