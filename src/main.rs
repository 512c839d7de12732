//! BCM Settings Bridge Daemon
//!
//! Connects a K+DCAN-style serial cable to the vehicle bus and runs the
//! settings coordinator: BCM init on startup, dashboard control frames in,
//! settings state frames out.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use bcm_bridge::clock::{Clock, MonotonicClock};
use bcm_bridge::constants::timing;
use bcm_bridge::transport::{CanTransport, SerialCanTransport};
use bcm_bridge::SettingsCoordinator;

const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .init();

    println!("╔═══════════════════════════════════════════════════════╗");
    println!("║     BCM Settings Bridge v1.0                          ║");
    println!("║     Dashboard <-> Body Control Module                 ║");
    println!("╚═══════════════════════════════════════════════════════╝");
    println!();

    let device = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_DEVICE.to_string());

    let mut transport = SerialCanTransport::open(&device)?;
    let clock = MonotonicClock::new();

    let mut coordinator = SettingsCoordinator::new();
    coordinator.start(clock.now_ms());

    let mut last_logged = coordinator.settings();
    let mut interval = tokio::time::interval(Duration::from_millis(timing::TICK_MS));

    loop {
        interval.tick().await;
        let now_ms = clock.now_ms();

        // Drain everything the cable has buffered before producing output
        loop {
            match transport.read_frame() {
                Ok(Some(frame)) => coordinator.on_frame(&frame, now_ms),
                Ok(None) => break,
                Err(e) => {
                    warn!("Cable read failed: {}", e);
                    break;
                }
            }
        }

        for frame in coordinator.tick(now_ms) {
            transport.write_frame(&frame)?;
        }

        let settings = coordinator.settings();
        if settings != last_logged {
            info!("Settings: {}", serde_json::to_string(&settings)?);
            last_logged = settings;
        }
    }
}
