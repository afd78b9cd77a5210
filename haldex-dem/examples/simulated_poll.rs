//! Poll every DEM sensor against the simulated module
//!
//! Usage:
//!   cargo run -p haldex-dem --example simulated_poll [cycles]
//!
//! Set RUST_LOG=debug to see frames and reassembly.

use haldex_dem::{DemPoller, PollerConfig, SimulatedDem};
use std::env;
use std::time::Duration;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cycles: u32 = env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(3);

    let config = PollerConfig::new().with_request_timeout(Duration::from_millis(500));
    let poller = match DemPoller::new(SimulatedDem::default(), config) {
        Ok(poller) => poller,
        Err(e) => {
            eprintln!("Failed to start poller: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = poller.start_keep_alive_default() {
        eprintln!("Failed to start keep-alive: {}", e);
    }

    for cycle in 1..=cycles {
        println!("=== Cycle {} ===", cycle);
        for (sensor, result) in poller.poll_all() {
            match result {
                Ok(readings) => {
                    for reading in readings {
                        println!("  {}", reading);
                    }
                }
                Err(e) => println!("  {}: {}", sensor, e),
            }
        }
    }

    poller.shutdown();
}
