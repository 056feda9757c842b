//! KICKR Bridge - Rust implementation
//!
//! Bridges Wahoo KICKR BIKE SHIFT button notifications to key presses.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kickr_bridge::bridge::Bridge;
use kickr_bridge::bus::{BusMessage, BusReceiver, ColorHint};
use kickr_bridge::config::{load_config, BridgeConfig, ButtonBehavior};
use kickr_bridge::keys::{ConsoleKeySink, KeySink};
use kickr_bridge::sim::SimTransport;
use kickr_bridge::StopHandle;

/// KICKR Bridge - turn bike shifter buttons into key presses
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (built-in defaults if omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Run against the in-process simulator instead of a real radio
    #[arg(long)]
    simulate: bool,

    /// Print the configured button table and exit
    #[arg(long)]
    list_buttons: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting KICKR Bridge...");

    let config = match &args.config {
        Some(path) => {
            info!("Configuration file: {}", path);
            load_config(path).await?
        }
        None => {
            info!("No configuration file given, using the reference layout");
            BridgeConfig::default()
        }
    };

    if args.list_buttons {
        print_button_table(&config);
        return Ok(());
    }

    if !args.simulate {
        anyhow::bail!(
            "no BLE backend is linked into this build; run with --simulate, \
             or wire a BleTransport implementation into the bridge"
        );
    }

    run_simulated(config).await?;
    info!("KICKR Bridge shutdown complete");
    Ok(())
}

/// Run the bridge against the in-process simulator with a scripted rider
async fn run_simulated(config: BridgeConfig) -> Result<()> {
    let sim = SimTransport::kickr();
    let sink: Arc<dyn KeySink> = Arc::new(ConsoleKeySink);

    let (bridge, bus, stop) = Bridge::new(config, Arc::new(sim.clone()), sink);
    let bridge_task = tokio::spawn(bridge.run());
    let rider = tokio::spawn(rider_script(sim, stop.clone()));

    drive_host_loop(bus, stop, &bridge_task).await;

    let final_state = bridge_task.await?;
    rider.abort();
    info!("Bridge finished in state: {}", final_state);
    Ok(())
}

/// Host side: drain the bus on a fixed cadence, forward ctrl-c as a stop
async fn drive_host_loop(
    mut bus: BusReceiver,
    stop: StopHandle,
    bridge_task: &tokio::task::JoinHandle<kickr_bridge::ConnectionState>,
) {
    let mut poll = tokio::time::interval(Duration::from_millis(80));

    loop {
        tokio::select! {
            _ = poll.tick() => {
                for message in bus.drain() {
                    render(&message);
                }
                if bridge_task.is_finished() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                info!("Shutdown signal received");
                stop.request_stop();
            }
        }
    }

    for message in bus.drain() {
        render(&message);
    }
}

fn render(message: &BusMessage) {
    match message {
        BusMessage::Log(line) => println!("{}", line),
        BusMessage::StatusChanged(state, color) => {
            let dot = match color {
                ColorHint::Gray => "●".bright_black(),
                ColorHint::Orange => "●".yellow(),
                ColorHint::Green => "●".green(),
                ColorHint::Red => "●".red(),
            };
            println!("{} {}", dot, state.to_string().bold());
        }
        BusMessage::ControlEnabled(enabled) => {
            let hint = if *enabled { "ready for a new start" } else { "running" };
            println!("{}", format!("[controls] {}", hint).bright_black());
        }
    }
}

/// Scripted rider for `--simulate`: taps, a steer hold, a duplicate delivery,
/// a junk frame, and the occasional mid-hold link drop.
async fn rider_script(sim: SimTransport, stop: StopHandle) {
    use tokio::time::sleep;

    const RIGHT_UP: u16 = 0x0001;
    const RIGHT_STEER: u16 = 0x0008;

    let mut rounds = 0u32;
    while !stop.is_requested() {
        if !sim.subscribed() {
            sleep(Duration::from_millis(50)).await;
            continue;
        }
        rounds += 1;

        let press = sim.press(RIGHT_UP);
        sleep(Duration::from_millis(120)).await;
        sim.send_raw(press); // BLE redelivery of the same press
        sim.release(RIGHT_UP);
        sleep(Duration::from_millis(400)).await;

        sim.press(RIGHT_STEER);
        sleep(Duration::from_millis(600)).await;
        if rounds % 4 == 0 {
            // Ride out of range mid-hold; the bridge must lift the key itself
            sim.drop_link();
            sleep(Duration::from_millis(500)).await;
            continue;
        }
        sim.release(RIGHT_STEER);

        sim.send_raw(vec![0x01, 0x02, 0x03, 0x04]); // not a short frame
        sleep(Duration::from_secs(2)).await;
    }
}

fn print_button_table(config: &BridgeConfig) {
    println!("\n{}", "=== Configured Buttons ===".bold().cyan());
    println!(
        "Device name prefix: {}",
        config.device.name_prefix.green()
    );

    for button in config.buttons.iter() {
        let key = button.key.as_deref().unwrap_or("-");
        let behavior = match button.behavior {
            ButtonBehavior::Tap => "tap".normal(),
            ButtonBehavior::Hold => "hold".yellow(),
        };
        println!(
            "  {}  {:<16} -> {:<10} [{}]",
            format!("{:04X}", button.prefix).cyan(),
            button.name,
            key.green(),
            behavior
        );
    }
    println!();
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
