//! The register bridge as seen by the Modbus master (the NEA SMART controller).
//!
//! The controller pushes what it senses by writing holding registers and pulls what clients want
//! by reading them. Writes land in the mirror bank and reads are answered from the command bank,
//! so the two directions never observe each other through this path.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::modbus::Exception;
use crate::store::{Bank, RegisterStore};

#[derive(Debug, Clone)]
pub struct CoilsRequest {
    pub unit_id: u8,
    pub is_write: bool,
    pub address: u16,
    pub quantity: u16,
    pub args: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct DiscreteInputsRequest {
    pub unit_id: u8,
    pub address: u16,
    pub quantity: u16,
}

#[derive(Debug, Clone)]
pub struct HoldingRegistersRequest {
    pub unit_id: u8,
    pub is_write: bool,
    pub address: u16,
    pub quantity: u16,
    /// Values to write, one per register. Empty for reads.
    pub args: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct InputRegistersRequest {
    pub unit_id: u8,
    pub address: u16,
    pub quantity: u16,
}

/// `Ok(None)` means the request is not addressed to us and must be left unanswered.
pub type HandlerResult<T> = Result<Option<Vec<T>>, Exception>;

/// What a Modbus server needs from the device it exposes.
///
/// For writes, the returned values are the register contents after the write.
pub trait RequestHandler: Send + Sync {
    /// Whether requests for `unit_id` are ours to answer. Others get no response at all.
    fn accepts(&self, unit_id: u8) -> bool;
    fn handle_coils(&self, req: &CoilsRequest) -> HandlerResult<bool>;
    fn handle_discrete_inputs(&self, req: &DiscreteInputsRequest) -> HandlerResult<bool>;
    fn handle_holding_registers(&self, req: &HoldingRegistersRequest) -> HandlerResult<u16>;
    fn handle_input_registers(&self, req: &InputRegistersRequest) -> HandlerResult<u16>;
}

/// Exposes a [`RegisterStore`] as the holding registers of a single slave.
pub struct NeaSmartHandler {
    store: Arc<RegisterStore>,
    unit_id: u8,
}

impl NeaSmartHandler {
    pub fn new(store: Arc<RegisterStore>, unit_id: u8) -> Self {
        Self { store, unit_id }
    }

}

impl RequestHandler for NeaSmartHandler {
    fn accepts(&self, unit_id: u8) -> bool {
        // Unit 0 is broadcast.
        unit_id == 0 || unit_id == self.unit_id
    }

    fn handle_coils(&self, _: &CoilsRequest) -> HandlerResult<bool> {
        Err(Exception::IllegalFunction)
    }

    fn handle_discrete_inputs(&self, _: &DiscreteInputsRequest) -> HandlerResult<bool> {
        Err(Exception::IllegalFunction)
    }

    fn handle_holding_registers(&self, req: &HoldingRegistersRequest) -> HandlerResult<u16> {
        if !self.accepts(req.unit_id) {
            debug!(message = "ignoring request for another unit", unit_id = req.unit_id);
            return Ok(None);
        }
        if u32::from(req.address) + u32::from(req.quantity) > 1 << 16 {
            return Err(Exception::IllegalDataAddress);
        }
        if req.is_write && req.args.len() != usize::from(req.quantity) {
            return Err(Exception::IllegalDataValue);
        }
        let addresses = (0..req.quantity).map(|i| req.address + i);
        let mut banks = self.store.lock();
        let values = if req.is_write {
            addresses
                .zip(&req.args)
                .map(|(address, &value)| {
                    banks.set(Bank::Mirror, address, value);
                    banks.get(Bank::Mirror, address)
                })
                .collect()
        } else {
            addresses.map(|address| banks.get(Bank::Command, address)).collect()
        };
        drop(banks);
        trace!(
            message = "handled holding registers",
            is_write = req.is_write,
            address = req.address,
            quantity = req.quantity
        );
        Ok(Some(values))
    }

    fn handle_input_registers(&self, _: &InputRegistersRequest) -> HandlerResult<u16> {
        Err(Exception::IllegalFunction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: u8 = 240;

    fn handler() -> (Arc<RegisterStore>, NeaSmartHandler) {
        let store = Arc::new(RegisterStore::new());
        (Arc::clone(&store), NeaSmartHandler::new(store, UNIT))
    }

    fn write(unit_id: u8, address: u16, args: Vec<u16>) -> HoldingRegistersRequest {
        let quantity = args.len() as u16;
        HoldingRegistersRequest { unit_id, is_write: true, address, quantity, args }
    }

    fn read(unit_id: u8, address: u16, quantity: u16) -> HoldingRegistersRequest {
        HoldingRegistersRequest { unit_id, is_write: false, address, quantity, args: vec![] }
    }

    #[test]
    fn writes_go_to_mirror_bank() {
        let (store, handler) = handler();
        let ack = handler.handle_holding_registers(&write(UNIT, 300, vec![2, 0x07D0, 0x0834]));
        assert_eq!(ack, Ok(Some(vec![2, 0x07D0, 0x0834])));
        let banks = store.lock();
        assert_eq!(banks.get(Bank::Mirror, 300), 2);
        assert_eq!(banks.get(Bank::Mirror, 301), 0x07D0);
        assert_eq!(banks.get(Bank::Mirror, 302), 0x0834);
        assert_eq!(banks.get(Bank::Command, 301), 0);
    }

    #[test]
    fn reads_come_from_command_bank() {
        let (store, handler) = handler();
        {
            let mut banks = store.lock();
            banks.set(Bank::Command, 1, 3);
            banks.set(Bank::Mirror, 2, 9);
        }
        let values = handler.handle_holding_registers(&read(UNIT, 1, 2));
        assert_eq!(values, Ok(Some(vec![3, 0])));
    }

    #[test]
    fn own_write_is_not_read_back() {
        let (_, handler) = handler();
        handler.handle_holding_registers(&write(UNIT, 100, vec![4])).unwrap();
        assert_eq!(handler.handle_holding_registers(&read(UNIT, 100, 1)), Ok(Some(vec![0])));
    }

    #[test]
    fn broadcast_is_handled() {
        let (store, handler) = handler();
        let ack = handler.handle_holding_registers(&write(0, 7, vec![0x85DA]));
        assert_eq!(ack, Ok(Some(vec![0x85DA])));
        assert_eq!(store.lock().get(Bank::Mirror, 7), 0x85DA);
    }

    #[test]
    fn other_units_are_ignored() {
        let (store, handler) = handler();
        assert_eq!(handler.handle_holding_registers(&write(1, 7, vec![5])), Ok(None));
        assert_eq!(handler.handle_holding_registers(&read(241, 7, 1)), Ok(None));
        assert_eq!(store.lock().get(Bank::Mirror, 7), 0);
    }

    #[test]
    fn rejects_address_overflow() {
        let (store, handler) = handler();
        assert_eq!(
            handler.handle_holding_registers(&write(UNIT, u16::MAX, vec![1, 2])),
            Err(Exception::IllegalDataAddress)
        );
        assert_eq!(store.lock().get(Bank::Mirror, u16::MAX), 0);
        assert_eq!(handler.handle_holding_registers(&read(UNIT, u16::MAX, 1)), Ok(Some(vec![0])));
    }

    #[test]
    fn rejects_mismatched_write() {
        let (_, handler) = handler();
        let mut req = write(UNIT, 10, vec![1, 2]);
        req.quantity = 3;
        assert_eq!(handler.handle_holding_registers(&req), Err(Exception::IllegalDataValue));
    }

    #[test]
    fn other_tables_are_illegal() {
        let (_, handler) = handler();
        for unit_id in [UNIT, 0, 1] {
            let coils =
                CoilsRequest { unit_id, is_write: true, address: 0, quantity: 1, args: vec![true] };
            assert_eq!(handler.handle_coils(&coils), Err(Exception::IllegalFunction));
            let inputs = DiscreteInputsRequest { unit_id, address: 0, quantity: 1 };
            assert_eq!(handler.handle_discrete_inputs(&inputs), Err(Exception::IllegalFunction));
            let registers = InputRegistersRequest { unit_id, address: 0, quantity: 1 };
            assert_eq!(handler.handle_input_registers(&registers), Err(Exception::IllegalFunction));
        }
    }

    #[test]
    fn accepts_own_unit_and_broadcast() {
        let (_, handler) = handler();
        assert!(handler.accepts(UNIT));
        assert!(handler.accepts(0));
        assert!(!handler.accepts(1));
        assert!(!handler.accepts(241));
    }
}
