use clap::Parser;
use tracing_subscriber::EnvFilter;

use borg_i2c::runtime::{self, Cli};

fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(target_os = "linux")]
fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    runtime::run(&borg_i2c::board::LinuxI2c, cli)
}

#[cfg(not(target_os = "linux"))]
fn run(_cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    Err("I2C access needs Linux (/dev/i2c-N)".into())
}
