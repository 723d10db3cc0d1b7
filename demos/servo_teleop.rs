// Keyboard servo teleop: 1-4 select servo, W/S move, C centre, P print JSON, Q quit
//
// Usage: cargo run --example servo_teleop -- [bus]

#[cfg(target_os = "linux")]
use borg_i2c::board::{Board, FilterMode, LinuxI2c, UltraBorg};
#[cfg(target_os = "linux")]
use borg_i2c::config::{DEFAULT_BUS, SERVO_STEP};
#[cfg(target_os = "linux")]
use borg_i2c::messages::ScanType;
#[cfg(target_os = "linux")]
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
#[cfg(target_os = "linux")]
use std::time::{Duration, Instant};
#[cfg(target_os = "linux")]
use tracing::info;

#[cfg(target_os = "linux")]
const DISTANCE_PERIOD_MS: u64 = 250; // How often to log distances

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("servo_teleop needs Linux I2C (/dev/i2c-N)");
}

#[cfg(target_os = "linux")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let bus = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<u8>()?,
        None => DEFAULT_BUS,
    };

    info!("Scanning bus {} for an UltraBorg...", bus);
    let mut board = Board::<UltraBorg, _>::connect(LinuxI2c, bus)?;
    board.load_calibration()?;

    info!("Controls: 1-4=select servo, W/S=move, C=centre, P=print, Q=quit");
    info!("Servo: 1");

    enable_raw_mode()?;
    let result = run_teleop(&mut board);
    disable_raw_mode()?;

    result
}

#[cfg(target_os = "linux")]
fn run_teleop(board: &mut Board<UltraBorg, LinuxI2c>) -> Result<(), Box<dyn std::error::Error>> {
    let mut selected: u8 = 1;

    // Start from wherever the servos are now
    let mut positions = [0.0f32; 4];
    for channel in 1..=4u8 {
        positions[channel as usize - 1] = board.servo_position(channel)?.clamp(-1.0, 1.0);
    }
    let mut last_distances = Instant::now();

    loop {
        // Poll for key with 20ms timeout
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let index = selected as usize - 1;

                match code {
                    // Servo selection
                    KeyCode::Char(c @ '1'..='4') if pressed => {
                        selected = c as u8 - b'0';
                        info!("Servo: {}", selected);
                    }

                    // Movement
                    KeyCode::Char('w') | KeyCode::Up if pressed => {
                        positions[index] = (positions[index] + SERVO_STEP).min(1.0);
                        board.set_servo_position(selected, positions[index])?;
                    }
                    KeyCode::Char('s') | KeyCode::Down if pressed => {
                        positions[index] = (positions[index] - SERVO_STEP).max(-1.0);
                        board.set_servo_position(selected, positions[index])?;
                    }
                    KeyCode::Char('c') if pressed => {
                        positions[index] = 0.0;
                        board.set_servo_position(selected, 0.0)?;
                    }

                    // Full snapshot
                    KeyCode::Char('p') if pressed => {
                        let reading = board.read_environment(ScanType::QuickScan)?;
                        info!("{}", serde_json::to_string(&reading)?);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_distances.elapsed() > Duration::from_millis(DISTANCE_PERIOD_MS) {
            let mut mm = [0u16; 4];
            for (i, distance) in mm.iter_mut().enumerate() {
                *distance = board.get_distance(i as u8 + 1, FilterMode::Filtered)?;
            }
            info!(
                "Servo {} at {:+.2} | distances {:?} mm",
                selected,
                positions[selected as usize - 1],
                mm
            );
            last_distances = Instant::now();
        }
    }

    Ok(())
}
