//! Isotope Board Check Tool
//!
//! Connects to a board, prints its firmware and sensor readings, and
//! optionally gives one motor a short spin.
//!
//! Usage:
//!   cargo run --example board_check -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial device or tcp://host:port (default: /dev/ttyACM0)
//!   --baud RATE       Baud rate (default: 115200)
//!   --timeout MS      Response timeout in ms (default: 5000)
//!   --motor ID        Rotate motor ID by 200 steps and wait for it
//!   --sim             Use the simulated board instead of hardware
//!   --debug           Debug logging (RUST_LOG overrides)

use isotope_core::prelude::*;
use std::time::{Duration, Instant};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut config = ConnectionConfig::new("/dev/ttyACM0");
    let mut motor: Option<usize> = None;
    let mut simulated = false;
    let mut debug = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if let Some(port) = args.get(i) {
                    config.address = port.clone();
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if let Some(rate) = args.get(i).and_then(|s| s.parse().ok()) {
                    config.baud_rate = rate;
                }
            }
            "--timeout" | "-t" => {
                i += 1;
                if let Some(ms) = args.get(i).and_then(|s| s.parse().ok()) {
                    config.response_timeout_ms = ms;
                }
            }
            "--motor" | "-m" => {
                i += 1;
                motor = args.get(i).and_then(|s| s.parse().ok());
            }
            "--sim" => simulated = true,
            "--debug" | "-d" => debug = true,
            "--help" | "-h" => {
                println!("Usage: board_check [--port PORT] [--baud RATE] [--timeout MS] [--motor ID] [--sim] [--debug]");
                return;
            }
            other if !other.starts_with('-') => config.address = other.to_string(),
            other => eprintln!("Ignoring unknown option {}", other),
        }
        i += 1;
    }

    isotope_core::logging::init(debug);

    println!("=== Isotope Board Check ===");
    if simulated {
        println!("Board: simulated");
    } else {
        println!("Port: {} @ {} baud", config.address, config.baud_rate);
        println!("Available serial ports:");
        for port in isotope_core::protocol::list_ports() {
            println!("  {}", port.name);
        }
    }
    println!();

    let mut board = Isotope::new(config);
    let start = Instant::now();
    let connected = if simulated {
        let (sim, _handle) = SimulatedBoard::new();
        board.connect_with_channel(Box::new(sim))
    } else {
        board.connect()
    };
    match connected {
        Ok(firmware) => println!(
            "Connected in {:?}, firmware v{}",
            start.elapsed(),
            firmware
        ),
        Err(e) => {
            println!("Connection failed: {}", e);
            std::process::exit(1);
        }
    }

    println!("\n--- ADC inputs ---");
    for adc in board.adcs() {
        match adc.value() {
            Ok(Some(value)) => println!("  ADC {}: {}", adc.id(), value),
            Ok(None) => println!("  ADC {}: no reading", adc.id()),
            Err(e) => println!("  ADC {}: {}", adc.id(), e),
        }
    }

    println!("\n--- Temperature inputs ---");
    for temp in board.temps_mut() {
        let id = temp.id();
        match temp.value() {
            Ok(Some(value)) => println!("  TEMP {}: {} C", id, value),
            Ok(None) => println!("  TEMP {}: no reading", id),
            Err(e) => println!("  TEMP {}: {}", id, e),
        }
    }

    if let Some(id) = motor {
        println!("\n--- Motor {} ---", id);
        if let Err(e) = spin(&mut board, id) {
            println!("  Motor test failed: {}", e);
        }
    }

    board.disconnect();
    println!("\nDone.");
}

fn spin(board: &mut Isotope, id: usize) -> Result<()> {
    let motor = board.motors_mut().get_mut(id)?;
    println!("  configure: {}", motor.configure(2, 400, 60)?);
    println!("  enable: {}", motor.enable()?);

    let start = Instant::now();
    if !motor.rotate_by_steps(200)? {
        println!("  rotation rejected");
        return Ok(());
    }
    let completed = motor.wait_until_motion_completed(Some(Duration::from_secs(10)), 0)?;
    println!("  completed: {} after {:?}", completed, start.elapsed());
    println!("  disable: {}", motor.disable()?);
    Ok(())
}
