// Address discovery and reassignment
//
// Boards are found by sweeping the bus with the universal ID query. Addresses
// with nothing attached fail at the transport level; that is expected and not
// reported.

use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::opcodes::OpcodeTable;
use super::protocol::{
    query_frame, write_frame, BoardAddress, BorgError, CommandFrame, Result, COMMAND_GET_ID,
    COMMAND_SET_I2C_ADD,
};
use super::transport::BusProvider;

/// First and one-past-last address probed by a sweep
pub const SCAN_START: u8 = 0x04;
pub const SCAN_END: u8 = 0x78;

/// Time the board needs to commit a new address to EEPROM
pub const ADDRESS_SETTLE: Duration = Duration::from_millis(200);

/// Sweep the bus for a board of the given type.
///
/// Every address is probed even after a hit; if several boards answer, the
/// highest address wins.
pub fn scan<P: BusProvider>(
    provider: &P,
    bus: u8,
    table: &OpcodeTable,
) -> Result<Option<BoardAddress>> {
    info!("Scanning bus {} for {}", bus, table.name);
    let mut i2c = provider.open(bus)?;
    let query = CommandFrame::new(COMMAND_GET_ID);
    let mut found = None;

    for address in SCAN_START..SCAN_END {
        let response = match query_frame(&mut i2c, address, &query, table.frame_len) {
            Ok(response) => response,
            Err(_) => continue,
        };

        if response[0] != COMMAND_GET_ID || response[1] != table.device_id {
            debug!(
                "0x{:02X} answered with ID 0x{:02X}, not a {}",
                address, response[1], table.name
            );
            continue;
        }

        match BoardAddress::new(address) {
            Ok(address) => {
                info!("Found {} at {}", table.name, address);
                found = Some(address);
            }
            Err(_) => warn!(
                "{} answered at reserved address 0x{:02X}, ignoring",
                table.name, address
            ),
        }
    }

    if found.is_none() {
        info!("No {} found on bus {}", table.name, bus);
    }
    Ok(found)
}

/// Check that a board of the given type answers at one specific address
pub fn probe<P: BusProvider>(
    provider: &P,
    bus: u8,
    address: BoardAddress,
    table: &OpcodeTable,
) -> Result<bool> {
    let mut i2c = provider.open(bus)?;
    let query = CommandFrame::new(COMMAND_GET_ID);
    match query_frame(&mut i2c, address.get(), &query, table.frame_len) {
        Ok(response) => Ok(response[0] == COMMAND_GET_ID && response[1] == table.device_id),
        Err(e) => {
            debug!("Probe of {} failed: {}", address, e);
            Ok(false)
        }
    }
}

/// Move a board to a new bus address.
///
/// The new address is written to the board's EEPROM and survives power
/// cycles. Keep a note of it: a board on an unexpected address is only found
/// again by scanning.
///
/// Without `old_address` the board is located by a scan first. After the
/// write the bus is re-scanned; if the board does not show up at the new
/// address the call fails with `AddressUnconfirmed` and nothing is retried.
pub fn set_new_address<P: BusProvider>(
    provider: &P,
    bus: u8,
    table: &OpcodeTable,
    new_address: u8,
    old_address: Option<BoardAddress>,
) -> Result<BoardAddress> {
    let new_address = BoardAddress::new(new_address)?;

    let old_address = match old_address {
        Some(address) => address,
        None => scan(provider, bus, table)?.ok_or(BorgError::NotFound {
            board: table.name,
            bus,
        })?,
    };

    info!(
        "Changing {} address from {} to {}",
        table.name, old_address, new_address
    );

    {
        let mut i2c = provider.open(bus)?;
        let frame = CommandFrame::new(COMMAND_SET_I2C_ADD).with_byte(new_address.get());
        write_frame(&mut i2c, old_address.get(), &frame)?;
    }

    sleep(ADDRESS_SETTLE);

    let confirmed = scan(provider, bus, table)?;
    if confirmed == Some(new_address) {
        warn!(
            "{} moved from {} to {}; this persists across power cycles",
            table.name, old_address, new_address
        );
        Ok(new_address)
    } else {
        warn!(
            "Failed to move {} to {}, board now at {:?}",
            table.name, new_address, confirmed
        );
        Err(BorgError::AddressUnconfirmed {
            requested: new_address.get(),
            found: confirmed.map(BoardAddress::get),
        })
    }
}

#[cfg(test)]
mod tests {
    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};

    use super::super::opcodes::{THUNDERBORG, ULTRABORG};
    use super::super::transport::testing::MockBus;
    use super::*;

    /// Expectations for one full sweep where only `answers` respond
    fn sweep(answers: &[(u8, Vec<u8>)]) -> Vec<I2cTrans> {
        let mut expectations = Vec::new();
        for address in SCAN_START..SCAN_END {
            match answers.iter().find(|(a, _)| *a == address) {
                Some((_, response)) => {
                    expectations.push(I2cTrans::write(address, vec![COMMAND_GET_ID]));
                    expectations.push(I2cTrans::read(address, response.clone()));
                }
                None => expectations.push(
                    I2cTrans::write(address, vec![COMMAND_GET_ID]).with_error(ErrorKind::Other),
                ),
            }
        }
        expectations
    }

    #[test]
    fn test_scan_finds_single_board() {
        let expectations = sweep(&[(0x15, vec![0x99, 0x15, 0, 0, 0, 0])]);
        let mut mock = I2cMock::new(&expectations);
        let found = scan(&MockBus(mock.clone()), 1, &THUNDERBORG).unwrap();
        assert_eq!(found, Some(BoardAddress::new(0x15).unwrap()));
        mock.done();
    }

    #[test]
    fn test_scan_last_match_wins() {
        let expectations = sweep(&[
            (0x0A, vec![0x99, 0x36, 0, 0]),
            (0x44, vec![0x99, 0x36, 0, 0]),
        ]);
        let mut mock = I2cMock::new(&expectations);
        let found = scan(&MockBus(mock.clone()), 1, &ULTRABORG).unwrap();
        assert_eq!(found, Some(BoardAddress::new(0x44).unwrap()));
        mock.done();
    }

    #[test]
    fn test_scan_rejects_wrong_device_id() {
        // A ZeroBorg ID at every address
        let answers: Vec<(u8, Vec<u8>)> = (SCAN_START..SCAN_END)
            .map(|address| (address, vec![0x99, 0x40, 0, 0, 0, 0]))
            .collect();
        let expectations = sweep(&answers);
        let mut mock = I2cMock::new(&expectations);
        let found = scan(&MockBus(mock.clone()), 1, &THUNDERBORG).unwrap();
        assert_eq!(found, None);
        mock.done();
    }

    #[test]
    fn test_scan_rejects_wrong_echo() {
        let expectations = sweep(&[(0x20, vec![0x98, 0x15, 0, 0, 0, 0])]);
        let mut mock = I2cMock::new(&expectations);
        let found = scan(&MockBus(mock.clone()), 1, &THUNDERBORG).unwrap();
        assert_eq!(found, None);
        mock.done();
    }

    #[test]
    fn test_scan_skips_failed_read() {
        let mut expectations = Vec::new();
        for address in SCAN_START..SCAN_END {
            expectations.push(I2cTrans::write(address, vec![COMMAND_GET_ID]));
            match address {
                0x36 => expectations.push(I2cTrans::read(address, vec![0x99, 0x36, 0, 0])),
                _ => expectations
                    .push(I2cTrans::read(address, vec![0; 4]).with_error(ErrorKind::Other)),
            }
        }
        let mut mock = I2cMock::new(&expectations);
        let found = scan(&MockBus(mock.clone()), 1, &ULTRABORG).unwrap();
        assert_eq!(found, Some(BoardAddress::new(0x36).unwrap()));
        mock.done();
    }

    #[test]
    fn test_scan_ignores_reserved_address() {
        let expectations = sweep(&[(0x77, vec![0x99, 0x36, 0, 0])]);
        let mut mock = I2cMock::new(&expectations);
        let found = scan(&MockBus(mock.clone()), 1, &ULTRABORG).unwrap();
        assert_eq!(found, None);
        mock.done();
    }

    #[test]
    fn test_set_new_address_rejects_reserved_before_bus() {
        let expectations: Vec<I2cTrans> = Vec::new();
        let mut mock = I2cMock::new(&expectations);
        let bus = MockBus(mock.clone());
        for bad in [0x00, 0x03, 0x77, 0x7F] {
            let err = set_new_address(&bus, 1, &THUNDERBORG, bad, None).unwrap_err();
            assert!(matches!(err, BorgError::OutOfRange { .. }));
        }
        mock.done();
    }

    #[test]
    fn test_set_new_address_scans_for_old() {
        let mut expectations = sweep(&[(0x36, vec![0x99, 0x36, 0, 0])]);
        expectations.push(I2cTrans::write(0x36, vec![COMMAND_SET_I2C_ADD, 0x20]));
        expectations.extend(sweep(&[(0x20, vec![0x99, 0x36, 0, 0])]));
        let mut mock = I2cMock::new(&expectations);
        let moved = set_new_address(&MockBus(mock.clone()), 1, &ULTRABORG, 0x20, None).unwrap();
        assert_eq!(moved, BoardAddress::new(0x20).unwrap());
        mock.done();
    }

    #[test]
    fn test_set_new_address_without_board_is_not_found() {
        let expectations = sweep(&[]);
        let mut mock = I2cMock::new(&expectations);
        let err = set_new_address(&MockBus(mock.clone()), 1, &ULTRABORG, 0x20, None).unwrap_err();
        assert!(matches!(
            err,
            BorgError::NotFound {
                board: "UltraBorg",
                bus: 1
            }
        ));
        mock.done();
    }
}
