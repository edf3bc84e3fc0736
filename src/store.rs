use std::sync::{Mutex, MutexGuard};

/// Number of registers in each bank, one for every possible Modbus register address.
pub const BANK_SIZE: usize = 1 << 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Bank {
    /// What the controller last told us. Written by the Modbus master, read by the facade.
    Mirror,
    /// What clients want the controller to do. Written by the facade, polled by the master.
    Command,
}

/// The register banks themselves.
///
/// Only reachable through [`RegisterStore::lock`], so holding a `&Banks` or `&mut Banks` means
/// holding the store's guard.
pub struct Banks {
    mirror: Box<[u16]>,
    command: Box<[u16]>,
}

impl Banks {
    fn new() -> Self {
        Self {
            mirror: vec![0; BANK_SIZE].into_boxed_slice(),
            command: vec![0; BANK_SIZE].into_boxed_slice(),
        }
    }

    fn bank(&self, bank: Bank) -> &[u16] {
        match bank {
            Bank::Mirror => &self.mirror,
            Bank::Command => &self.command,
        }
    }

    pub fn get(&self, bank: Bank, address: u16) -> u16 {
        self.bank(bank)[usize::from(address)]
    }

    pub fn set(&mut self, bank: Bank, address: u16, value: u16) {
        let bank = match bank {
            Bank::Mirror => &mut self.mirror,
            Bank::Command => &mut self.command,
        };
        bank[usize::from(address)] = value;
    }
}

/// Two zero-initialized register banks behind one exclusive guard.
///
/// The store does not know anything about transactions. Whoever needs several registers to change
/// (or be read) together takes the guard once for the whole operation.
pub struct RegisterStore {
    banks: Mutex<Banks>,
}

impl RegisterStore {
    pub fn new() -> Self {
        Self { banks: Mutex::new(Banks::new()) }
    }

    pub fn lock(&self) -> MutexGuard<'_, Banks> {
        // Every write is a whole `u16`, so the banks are consistent even if a holder panicked.
        self.banks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed() {
        let store = RegisterStore::new();
        let banks = store.lock();
        for address in [0, 1, 300, u16::MAX] {
            assert_eq!(banks.get(Bank::Mirror, address), 0);
            assert_eq!(banks.get(Bank::Command, address), 0);
        }
    }

    #[test]
    fn banks_are_independent() {
        let store = RegisterStore::new();
        let mut banks = store.lock();
        banks.set(Bank::Mirror, 301, 0x07D0);
        banks.set(Bank::Command, 301, 0x0C33);
        banks.set(Bank::Command, u16::MAX, 7);
        assert_eq!(banks.get(Bank::Mirror, 301), 0x07D0);
        assert_eq!(banks.get(Bank::Command, 301), 0x0C33);
        assert_eq!(banks.get(Bank::Command, u16::MAX), 7);
        assert_eq!(banks.get(Bank::Mirror, u16::MAX), 0);
    }

    #[test]
    fn survives_poisoning() {
        let store = std::sync::Arc::new(RegisterStore::new());
        let clone = std::sync::Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let mut banks = clone.lock();
            banks.set(Bank::Mirror, 1, 3);
            panic!("poison the guard");
        })
        .join();
        assert_eq!(store.lock().get(Bank::Mirror, 1), 3);
    }

    #[test]
    fn bank_names() {
        assert_eq!(Bank::Mirror.to_string(), "mirror");
        assert_eq!(Bank::Command.to_string(), "command");
    }
}
