// Motor test: Careful, step-by-step test for motor control
//
// IMPORTANT: Run board_diagnostic FIRST to verify read-only communication.
//
// Usage: cargo run --example motor_test -- [thunderborg|zeroborg|diabolo] [bus]
// Example: cargo run --example motor_test -- thunderborg 1
//
// Safety features:
// - Explicit confirmation before any writes
// - Starts with zero power
// - Low test power
// - Communications failsafe on while running
// - Easy abort with Ctrl+C

#[cfg(target_os = "linux")]
use borg_i2c::board::{Board, BoardKind, BusProvider, Diabolo, LinuxI2c, ThunderBorg, ZeroBorg};
#[cfg(target_os = "linux")]
use borg_i2c::config::{DEFAULT_BUS, DEMO_MAX_POWER};
#[cfg(target_os = "linux")]
use std::io::{self, Write};
#[cfg(target_os = "linux")]
use std::thread::sleep;
#[cfg(target_os = "linux")]
use std::time::Duration;

#[cfg(target_os = "linux")]
fn confirm(prompt: &str) -> bool {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush().unwrap();
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();
    input.trim().eq_ignore_ascii_case("y")
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("motor_test needs Linux I2C (/dev/i2c-N)");
}

#[cfg(target_os = "linux")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    // Get board type and bus from args or use defaults
    let kind = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "thunderborg".to_string());
    let bus = match std::env::args().nth(2) {
        Some(arg) => arg.parse::<u8>()?,
        None => DEFAULT_BUS,
    };

    match kind.as_str() {
        "thunderborg" => run::<ThunderBorg>(bus),
        "zeroborg" => run::<ZeroBorg>(bus),
        "diabolo" => run::<Diabolo>(bus),
        other => {
            println!("Unknown board '{}': use thunderborg, zeroborg or diabolo", other);
            Ok(())
        }
    }
}

#[cfg(target_os = "linux")]
fn run<K: BoardKind>(bus: u8) -> Result<(), Box<dyn std::error::Error>> {
    let name = K::TABLE.name;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              PiBorg Motor Test (WITH WRITES)                 ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  ⚠  This tool WILL drive the motors!                         ║");
    println!("║  ⚠  Make sure wheels are OFF THE GROUND before proceeding!   ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Board: {}", name);
    println!("I2C bus: {}", LinuxI2c::device_path(bus));
    println!();

    if !confirm("Have you run board_diagnostic first and verified the board responds?") {
        println!("Please run: cargo run --example board_diagnostic -- {}", bus);
        return Ok(());
    }

    if !confirm("Are the robot's wheels OFF THE GROUND (robot elevated/on blocks)?") {
        println!("Please elevate the robot so wheels can spin freely without moving the robot.");
        return Ok(());
    }

    println!();
    println!("Scanning for {}...", name);
    let mut board = Board::<K, _>::connect(LinuxI2c, bus)?;
    println!("✓ Connected at {}", board.address()?);
    println!();

    // ========== STEP 1: Verify communication (read-only) ==========
    println!("Step 1: Reading motor state (read-only)...");
    let channels = board.table().channels;
    for channel in 1..=channels {
        match board.get_motor(channel) {
            Ok(power) => println!("  ✓ Motor {} reports power {}", channel, power),
            Err(e) => {
                println!("  ✗ Motor {} error: {} - aborting", channel, e);
                return Ok(());
            }
        }
    }
    println!();

    // ========== STEP 2: Failsafe ==========
    println!("Step 2: Enabling the communications failsafe...");
    println!("  The board stops its motors if it hears nothing for 1/4 second.");
    println!();

    if !confirm("Enable failsafe?") {
        println!("Aborted.");
        return Ok(());
    }
    board.set_failsafe(true)?;
    println!("  ✓ Failsafe {}", if board.get_failsafe()? { "enabled" } else { "NOT enabled" });
    println!();

    // ========== STEP 3: Test zero power ==========
    println!("Step 3: Sending ZERO power to all motors...");
    println!("  This should NOT cause any movement.");
    println!();

    if !confirm("Send zero power command?") {
        stop_motors(&mut board);
        return Ok(());
    }

    board.set_all_motors(0)?;
    println!("  ✓ Zero power sent");
    sleep(Duration::from_millis(100));

    println!("  Reading back power...");
    for channel in 1..=channels {
        let power = board.get_motor(channel)?;
        println!("    Motor {} power: {} (should be 0)", channel, power);
    }
    println!();

    // ========== STEP 4: Slow motion test ==========
    let test_power = DEMO_MAX_POWER / 2;
    println!("Step 4: Slow motion test");
    println!("  Power: {} of 255", test_power);
    println!("  Duration: 0.2 seconds per direction (inside the failsafe window)");
    println!();
    println!("  ⚠  WATCH THE WHEELS - they should spin slowly!");
    println!("  ⚠  Press Ctrl+C at any time to abort!");
    println!();

    if !confirm("Proceed with motion test?") {
        stop_motors(&mut board);
        return Ok(());
    }

    let test_duration = Duration::from_millis(200);
    let pause_duration = Duration::from_millis(300);

    for channel in 1..=channels {
        for (label, power) in [("forward", test_power), ("reverse", -test_power)] {
            println!("  Testing: motor {} {}...", channel, label);
            board.set_motor(channel, power)?;
            sleep(test_duration);

            let reported = board.get_motor(channel)?;
            println!("    Commanded {}, board reports {}", power, reported);

            // Stop between tests
            board.all_stop()?;
            sleep(pause_duration);
        }
    }

    // ========== FINAL: Stop and cleanup ==========
    println!();
    println!("Step 5: Stopping motors...");
    stop_motors(&mut board);
    println!("  ✓ Motors stopped");

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Test Complete!                            ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("If the wheels moved as expected, the motor control is working correctly.");
    println!("You can now drive a single motor with: cargo run -- motor <board> <channel> <power>");

    Ok(())
}

#[cfg(target_os = "linux")]
fn stop_motors<K: BoardKind, P: BusProvider>(board: &mut Board<K, P>) {
    // Ignore errors on cleanup
    let _ = board.all_stop();
    let _ = board.set_failsafe(false);
}
