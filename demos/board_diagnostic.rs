// Board diagnostic: READ-ONLY check of every PiBorg board on the bus
//
// This tool does NOT write anything to the boards - it's completely safe.
// Use this first before running motor_test or servo_teleop.
//
// Usage: cargo run --example board_diagnostic -- [bus]
// Example: cargo run --example board_diagnostic -- 1

#[cfg(target_os = "linux")]
use borg_i2c::board::{
    Board, BoardAddress, Diabolo, FilterMode, LinuxI2c, ServoBoundary, ThunderBorg, UltraBorg,
    ZeroBorg,
};
#[cfg(target_os = "linux")]
use borg_i2c::config::DEFAULT_BUS;

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("board_diagnostic needs Linux I2C (/dev/i2c-N)");
}

#[cfg(target_os = "linux")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    // Get bus from args or use default
    let bus = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<u8>()?,
        None => DEFAULT_BUS,
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║           PiBorg Board Diagnostic (READ-ONLY)                ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  This tool only READS from boards - no writes, no movement   ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("I2C bus: {}", LinuxI2c::device_path(bus));
    println!();

    // Open the bus once up front so a missing device fails early
    println!("Step 1: Opening I2C bus...");
    match borg_i2c::board::BusProvider::open(&LinuxI2c, bus) {
        Ok(_) => println!("  ✓ Bus opened successfully"),
        Err(e) => {
            println!("  ✗ Failed to open bus: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Enable I2C (raspi-config > Interface Options > I2C)");
            println!("  - Check the bus number (ls /dev/i2c-*)");
            println!("  - Add your user to the i2c group");
            return Err(e.into());
        }
    }
    println!();

    println!("Step 2: Scanning for boards...");
    let thunder = Board::<ThunderBorg, _>::scan(&LinuxI2c, bus)?;
    let zero = Board::<ZeroBorg, _>::scan(&LinuxI2c, bus)?;
    let diabolo = Board::<Diabolo, _>::scan(&LinuxI2c, bus)?;
    let ultra = Board::<UltraBorg, _>::scan(&LinuxI2c, bus)?;
    for (name, found) in [
        ("ThunderBorg", thunder),
        ("ZeroBorg", zero),
        ("Diabolo", diabolo),
        ("UltraBorg", ultra),
    ] {
        match found {
            Some(address) => println!("  {:<12} ✓ found at {}", name, address),
            None => println!("  {:<12} - not present", name),
        }
    }
    println!();

    println!("Step 3: Reading boards...");
    println!();
    if let Some(address) = thunder {
        read_thunderborg(bus, address);
    }
    if let Some(address) = zero {
        read_zeroborg(bus, address);
    }
    if let Some(address) = diabolo {
        read_diabolo(bus, address);
    }
    if let Some(address) = ultra {
        read_ultraborg(bus, address);
    }

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Diagnostic Complete                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("If every board responded and shows reasonable values:");
    println!("  1. Motor powers should read 0 when nothing is running");
    println!("  2. Battery voltage should match your supply");
    println!("  3. Distances read 0 mm when nothing is in range");
    println!();
    println!("Next step: Run 'cargo run --example motor_test' with wheels OFF THE GROUND");

    Ok(())
}

#[cfg(target_os = "linux")]
fn read_thunderborg(bus: u8, address: BoardAddress) {
    println!("  === ThunderBorg ({}) ===", address);
    let board = match Board::<ThunderBorg, _>::attach(LinuxI2c, bus, address) {
        Ok(board) => board,
        Err(e) => {
            println!("    ERROR - {}", e);
            return;
        }
    };

    match board.battery_voltage() {
        Ok(v) => println!("    Battery:          {:.2} V", v),
        Err(e) => println!("    Battery:          ERROR - {}", e),
    }
    match board.battery_limits() {
        Ok((min, max)) => println!("    Battery limits:   {:.2} V .. {:.2} V", min, max),
        Err(e) => println!("    Battery limits:   ERROR - {}", e),
    }
    for channel in 1..=2 {
        match board.get_motor(channel) {
            Ok(power) => println!("    Motor {}:          {}", channel, power),
            Err(e) => println!("    Motor {}:          ERROR - {}", channel, e),
        }
        match board.drive_fault(channel) {
            Ok(fault) => {
                let status = if fault { "FAULT" } else { "ok" };
                println!("    Drive fault {}:    {}", channel, status);
            }
            Err(e) => println!("    Drive fault {}:    ERROR - {}", channel, e),
        }
    }
    match board.get_failsafe() {
        Ok(on) => println!("    Failsafe:         {}", if on { "ENABLED" } else { "disabled" }),
        Err(e) => println!("    Failsafe:         ERROR - {}", e),
    }
    println!();
}

#[cfg(target_os = "linux")]
fn read_zeroborg(bus: u8, address: BoardAddress) {
    println!("  === ZeroBorg ({}) ===", address);
    let board = match Board::<ZeroBorg, _>::attach(LinuxI2c, bus, address) {
        Ok(board) => board,
        Err(e) => {
            println!("    ERROR - {}", e);
            return;
        }
    };

    for channel in 1..=4 {
        match board.get_motor(channel) {
            Ok(power) => println!("    Motor {}:          {}", channel, power),
            Err(e) => println!("    Motor {}:          ERROR - {}", channel, e),
        }
    }
    match board.get_epo() {
        Ok(tripped) => println!("    EPO:              {}", if tripped { "TRIPPED" } else { "ok" }),
        Err(e) => println!("    EPO:              ERROR - {}", e),
    }
    match board.get_epo_ignore() {
        Ok(ignore) => println!("    EPO ignore:       {}", ignore),
        Err(e) => println!("    EPO ignore:       ERROR - {}", e),
    }
    for channel in 1..=2 {
        match board.analog(channel) {
            Ok(v) => println!("    Analog {}:         {:.2} V", channel, v),
            Err(e) => println!("    Analog {}:         ERROR - {}", channel, e),
        }
    }
    println!();
}

#[cfg(target_os = "linux")]
fn read_diabolo(bus: u8, address: BoardAddress) {
    println!("  === Diabolo ({}) ===", address);
    let board = match Board::<Diabolo, _>::attach(LinuxI2c, bus, address) {
        Ok(board) => board,
        Err(e) => {
            println!("    ERROR - {}", e);
            return;
        }
    };

    for channel in 1..=2 {
        match board.get_motor(channel) {
            Ok(power) => println!("    Motor {}:          {}", channel, power),
            Err(e) => println!("    Motor {}:          ERROR - {}", channel, e),
        }
    }
    match board.get_failsafe() {
        Ok(on) => println!("    Failsafe:         {}", if on { "ENABLED" } else { "disabled" }),
        Err(e) => println!("    Failsafe:         ERROR - {}", e),
    }
    println!();
}

#[cfg(target_os = "linux")]
fn read_ultraborg(bus: u8, address: BoardAddress) {
    println!("  === UltraBorg ({}) ===", address);
    let mut board = match Board::<UltraBorg, _>::attach(LinuxI2c, bus, address) {
        Ok(board) => board,
        Err(e) => {
            println!("    ERROR - {}", e);
            return;
        }
    };

    for channel in 1..=4 {
        let min = board.get_servo(channel, ServoBoundary::Minimum);
        let max = board.get_servo(channel, ServoBoundary::Maximum);
        let boot = board.get_servo(channel, ServoBoundary::Boot);
        match (min, max, boot) {
            (Ok(min), Ok(max), Ok(boot)) => println!(
                "    Servo {}:          min {} / max {} / boot {}",
                channel, min, max, boot
            ),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                println!("    Servo {}:          ERROR - {}", channel, e)
            }
        }
    }
    for channel in 1..=4 {
        match board.get_distance(channel, FilterMode::Filtered) {
            Ok(0) => println!("    Distance {}:       nothing in range", channel),
            Ok(mm) => println!("    Distance {}:       {} mm", channel, mm),
            Err(e) => println!("    Distance {}:       ERROR - {}", channel, e),
        }
    }
    println!();
}
