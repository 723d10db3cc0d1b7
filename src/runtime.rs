// Command-line front end
// Each subcommand binds one board, does its job and releases the bus.

use std::thread::sleep;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

// local imports
use crate::board::{
    Board, BoardAddress, BoardKind, BorgError, BusProvider, Diabolo, FilterMode, ThunderBorg,
    UltraBorg, ZeroBorg,
};
use crate::config::{DEFAULT_BUS, MOTOR_RUN_TIME, POLL_HZ};
use crate::messages::{BoardStatus, ScanType};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Parser)]
#[command(name = "borg-i2c", version, about = "Control PiBorg I2C boards")]
pub struct Cli {
    /// I2C bus number (/dev/i2c-N)
    #[arg(long, default_value_t = DEFAULT_BUS)]
    pub bus: u8,

    /// Talk to the board at this address instead of scanning for it
    #[arg(long, value_parser = parse_address)]
    pub address: Option<u8>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Look for boards on the bus
    Scan {
        /// Only look for this board type
        #[arg(value_enum)]
        board: Option<BoardType>,
    },
    /// Permanently move a board to a new address
    SetAddress {
        #[arg(value_enum)]
        board: BoardType,
        #[arg(value_parser = parse_address)]
        new_address: u8,
    },
    /// Print a JSON status snapshot
    Status {
        #[arg(value_enum)]
        board: BoardType,
        /// How much of an UltraBorg to read
        #[arg(long, value_enum, default_value_t = ScanType::SensorsOnly)]
        scan: ScanType,
    },
    /// Run one motor briefly, then stop
    Motor {
        #[arg(value_enum)]
        board: BoardType,
        channel: u8,
        #[arg(allow_hyphen_values = true)]
        power: i16,
    },
    /// Stop all motors
    Stop {
        #[arg(value_enum)]
        board: BoardType,
    },
    /// Poll the UltraBorg distance sensors
    Distances {
        /// Number of polls (runs until interrupted if omitted)
        #[arg(long)]
        count: Option<u32>,
        /// Read raw pings instead of the filtered values
        #[arg(long)]
        raw: bool,
    },
    /// Move an UltraBorg servo to a position between -1.0 and 1.0
    Servo {
        channel: u8,
        #[arg(allow_hyphen_values = true)]
        position: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BoardType {
    #[value(name = "thunderborg")]
    ThunderBorg,
    #[value(name = "zeroborg")]
    ZeroBorg,
    #[value(name = "diabolo")]
    Diabolo,
    #[value(name = "ultraborg")]
    UltraBorg,
}

/// Accepts "0x15" or "21"
pub fn parse_address(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

/// Bind a board either at a known address or by scanning
pub fn open_board<K: BoardKind, P: BusProvider>(
    provider: P,
    bus: u8,
    address: Option<u8>,
) -> crate::board::Result<Board<K, P>> {
    match address {
        Some(address) => Board::attach(provider, bus, BoardAddress::new(address)?),
        None => Board::connect(provider, bus),
    }
}

pub fn run<P: BusProvider>(provider: &P, cli: Cli) -> CliResult<()> {
    let bus = cli.bus;
    let address = cli.address;

    match cli.command {
        Command::Scan { board } => scan(provider, bus, board),
        Command::SetAddress { board, new_address } => {
            let old = address.map(BoardAddress::new).transpose()?;
            let moved = match board {
                BoardType::ThunderBorg => {
                    Board::<ThunderBorg, _>::set_new_address(provider, bus, new_address, old)?
                }
                BoardType::ZeroBorg => {
                    Board::<ZeroBorg, _>::set_new_address(provider, bus, new_address, old)?
                }
                BoardType::Diabolo => {
                    Board::<Diabolo, _>::set_new_address(provider, bus, new_address, old)?
                }
                BoardType::UltraBorg => {
                    Board::<UltraBorg, _>::set_new_address(provider, bus, new_address, old)?
                }
            };
            println!("Board moved to {}", moved);
            Ok(())
        }
        Command::Status { board, scan } => {
            let status = status(provider, bus, address, board, scan)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Motor {
            board,
            channel,
            power,
        } => match board {
            BoardType::ThunderBorg => {
                run_motor::<ThunderBorg, _>(provider, bus, address, channel, power)
            }
            BoardType::ZeroBorg => run_motor::<ZeroBorg, _>(provider, bus, address, channel, power),
            BoardType::Diabolo => run_motor::<Diabolo, _>(provider, bus, address, channel, power),
            BoardType::UltraBorg => Err(unsupported_board(board, "motors")),
        },
        Command::Stop { board } => match board {
            BoardType::ThunderBorg => stop::<ThunderBorg, _>(provider, bus, address),
            BoardType::ZeroBorg => stop::<ZeroBorg, _>(provider, bus, address),
            BoardType::Diabolo => stop::<Diabolo, _>(provider, bus, address),
            BoardType::UltraBorg => Err(unsupported_board(board, "motors")),
        },
        Command::Distances { count, raw } => {
            let mut ultra = open_board::<UltraBorg, _>(provider, bus, address)?;
            let mode = if raw {
                FilterMode::Unfiltered
            } else {
                FilterMode::Filtered
            };
            poll_distances(&mut ultra, mode, count)
        }
        Command::Servo { channel, position } => {
            let mut ultra = open_board::<UltraBorg, _>(provider, bus, address)?;
            ultra.load_calibration()?;
            ultra.set_servo_position(channel, position)?;
            info!("Servo {} set to {:.2}", channel, position);
            Ok(())
        }
    }
}

fn unsupported_board(board: BoardType, operation: &'static str) -> Box<dyn std::error::Error> {
    Box::new(BorgError::Unsupported {
        board: board_name(board),
        operation,
    })
}

fn board_name(board: BoardType) -> &'static str {
    match board {
        BoardType::ThunderBorg => ThunderBorg::TABLE.name,
        BoardType::ZeroBorg => ZeroBorg::TABLE.name,
        BoardType::Diabolo => Diabolo::TABLE.name,
        BoardType::UltraBorg => UltraBorg::TABLE.name,
    }
}

fn scan<P: BusProvider>(provider: &P, bus: u8, only: Option<BoardType>) -> CliResult<()> {
    let kinds = match only {
        Some(board) => vec![board],
        None => vec![
            BoardType::ThunderBorg,
            BoardType::ZeroBorg,
            BoardType::Diabolo,
            BoardType::UltraBorg,
        ],
    };

    for kind in kinds {
        let found = match kind {
            BoardType::ThunderBorg => Board::<ThunderBorg, _>::scan(provider, bus)?,
            BoardType::ZeroBorg => Board::<ZeroBorg, _>::scan(provider, bus)?,
            BoardType::Diabolo => Board::<Diabolo, _>::scan(provider, bus)?,
            BoardType::UltraBorg => Board::<UltraBorg, _>::scan(provider, bus)?,
        };
        match found {
            Some(address) => println!("{:<12} {}", board_name(kind), address),
            None => println!("{:<12} not found", board_name(kind)),
        }
    }
    Ok(())
}

/// Collect a status snapshot for one board
pub fn status<P: BusProvider>(
    provider: &P,
    bus: u8,
    address: Option<u8>,
    board: BoardType,
    scan: ScanType,
) -> CliResult<BoardStatus> {
    let status = match board {
        BoardType::ThunderBorg => {
            let thunder = open_board::<ThunderBorg, _>(provider, bus, address)?;
            BoardStatus::ThunderBorg {
                address: thunder.address()?.get(),
                battery_voltage: thunder.battery_voltage()?,
                motors: read_motors(&thunder)?,
                drive_faults: vec![thunder.drive_fault(1)?, thunder.drive_fault(2)?],
                settings: thunder.read_settings()?,
            }
        }
        BoardType::ZeroBorg => {
            let zero = open_board::<ZeroBorg, _>(provider, bus, address)?;
            BoardStatus::ZeroBorg {
                address: zero.address()?.get(),
                motors: read_motors(&zero)?,
                failsafe: zero.get_failsafe()?,
                epo: zero.get_epo()?,
                epo_ignore: zero.get_epo_ignore()?,
                analog: [zero.analog(1)?, zero.analog(2)?],
            }
        }
        BoardType::Diabolo => {
            let diabolo = open_board::<Diabolo, _>(provider, bus, address)?;
            BoardStatus::Diabolo {
                address: diabolo.address()?.get(),
                motors: read_motors(&diabolo)?,
                failsafe: diabolo.get_failsafe()?,
            }
        }
        BoardType::UltraBorg => {
            let mut ultra = open_board::<UltraBorg, _>(provider, bus, address)?;
            BoardStatus::UltraBorg {
                address: ultra.address()?.get(),
                reading: ultra.read_environment(scan)?,
            }
        }
    };
    Ok(status)
}

fn read_motors<K: BoardKind, P: BusProvider>(
    board: &Board<K, P>,
) -> crate::board::Result<Vec<i16>> {
    (1..=board.table().channels)
        .map(|channel| board.get_motor(channel))
        .collect()
}

fn run_motor<K: BoardKind, P: BusProvider>(
    provider: &P,
    bus: u8,
    address: Option<u8>,
    channel: u8,
    power: i16,
) -> CliResult<()> {
    let mut board = open_board::<K, _>(provider, bus, address)?;
    board.set_motor(channel, power)?;
    info!(
        "Motor {} at {} for {}ms",
        channel,
        power,
        MOTOR_RUN_TIME.as_millis()
    );
    sleep(MOTOR_RUN_TIME);

    let reported = board.get_motor(channel);
    board.all_stop()?;
    match reported {
        Ok(reported) if reported != power => {
            warn!(
                "Motor {} reported {} while running, expected {}",
                channel, reported, power
            )
        }
        Ok(_) => {}
        Err(e) => warn!("Could not read back motor {}: {}", channel, e),
    }
    Ok(())
}

fn stop<K: BoardKind, P: BusProvider>(provider: &P, bus: u8, address: Option<u8>) -> CliResult<()> {
    open_board::<K, _>(provider, bus, address)?.all_stop()?;
    Ok(())
}

fn poll_distances<P: BusProvider>(
    ultra: &mut Board<UltraBorg, P>,
    mode: FilterMode,
    count: Option<u32>,
) -> CliResult<()> {
    let period = Duration::from_millis(1000 / POLL_HZ);
    info!(
        "Polling distances ({:?}) at {}Hz from {}",
        mode,
        POLL_HZ,
        ultra.address()?
    );

    let mut polls = 0u32;
    while count.is_none_or(|limit| polls < limit) {
        let mut line = String::new();
        for channel in 1..=4 {
            let mm = ultra.get_distance(channel, mode)?;
            if mm == 0 {
                line.push_str(&format!("  #{}: ----- ", channel));
            } else {
                line.push_str(&format!("  #{}: {:>4} mm", channel, mm));
            }
        }
        println!("{}", line);
        polls += 1;
        sleep(period);
    }
    Ok(())
}
