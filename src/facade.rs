//! Typed views over the register store for REST clients.
//!
//! Everything a client reads comes from the mirror bank (what the controller reported last) and
//! everything a client writes goes to the command bank (picked up by the controller when it next
//! polls). A client therefore never reads back its own write directly: it only becomes visible
//! once the controller has applied it and reported the new state.

use std::sync::Arc;

use tracing::debug;

use crate::dpt9001;
use crate::registers::{self, *};
use crate::store::{Bank, RegisterStore};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("base unit {0} does not exist")]
    InvalidBaseId(u16),
    #[error("zone {0} does not exist")]
    InvalidZoneId(u16),
    #[error("mixing group {0} does not exist")]
    InvalidMixedGroupId(u16),
    #[error("dehumidifier {0} does not exist")]
    InvalidDehumidifierId(u16),
    #[error("extra pump {0} does not exist")]
    InvalidPumpId(u16),
    #[error("zone state {0} is not valid")]
    InvalidZoneState(u16),
    #[error("operation mode {0} is not valid")]
    InvalidMode(u16),
    #[error("operation status {0} is not valid")]
    InvalidStatus(u16),
    #[error("zone update changes nothing")]
    EmptyZoneUpdate,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Zone {
    pub state: u16,
    pub setpoint: f32,
    pub temperature: f32,
    pub relative_humidity: u16,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct ZoneUpdate {
    pub state: Option<u16>,
    pub setpoint: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MixedGroup {
    pub mixing_valve_opening: u16,
    pub pump_status: u16,
    pub flow_temperature: f32,
    pub return_temperature: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutsideTemperature {
    pub outside_temperature: f32,
    pub filtered_outside_temperature: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Notifications {
    pub hints_present: bool,
    pub warnings_present: bool,
    pub errors_present: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OperationMode {
    pub mode: u16,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OperationStatus {
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Dehumidifier {
    pub dehumidifier_status: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Pump {
    pub pump_status: bool,
}

fn check(
    id: u16,
    range: std::ops::RangeInclusive<u16>,
    error: fn(u16) -> Error,
) -> Result<u16, Error> {
    if range.contains(&id) { Ok(id) } else { Err(error(id)) }
}

fn check_zone(base_id: u16, zone_id: u16) -> Result<u16, Error> {
    let base_id = check(base_id, BASE_IDS, Error::InvalidBaseId)?;
    let zone_id = check(zone_id, ZONE_IDS, Error::InvalidZoneId)?;
    Ok(zone_address(base_id, zone_id))
}

#[derive(Clone)]
pub struct Facade {
    store: Arc<RegisterStore>,
}

impl Facade {
    pub fn new(store: Arc<RegisterStore>) -> Self {
        Self { store }
    }

    pub fn zone(&self, base_id: u16, zone_id: u16) -> Result<Zone, Error> {
        let address = check_zone(base_id, zone_id)?;
        let banks = self.store.lock();
        Ok(Zone {
            state: banks.get(Bank::Mirror, address),
            setpoint: dpt9001::decode(banks.get(Bank::Mirror, address + ZONE_SETPOINT_OFFSET)),
            temperature: dpt9001::decode(
                banks.get(Bank::Mirror, address + ZONE_TEMPERATURE_OFFSET),
            ),
            relative_humidity: banks.get(Bank::Mirror, address + ZONE_RELATIVE_HUMIDITY_OFFSET),
        })
    }

    pub fn update_zone(
        &self,
        base_id: u16,
        zone_id: u16,
        update: &ZoneUpdate,
    ) -> Result<(), Error> {
        let address = check_zone(base_id, zone_id)?;
        if update.state.is_none() && update.setpoint.is_none() {
            return Err(Error::EmptyZoneUpdate);
        }
        if let Some(state) = update.state {
            check(state, ZONE_STATES, Error::InvalidZoneState)?;
        }
        let mut banks = self.store.lock();
        if let Some(state) = update.state {
            banks.set(Bank::Command, address, state);
        }
        if let Some(setpoint) = update.setpoint {
            banks.set(Bank::Command, address + ZONE_SETPOINT_OFFSET, dpt9001::encode(setpoint));
        }
        drop(banks);
        debug!(
            message = "commanded zone",
            base_id,
            zone_id,
            state = ?update.state,
            setpoint = ?update.setpoint
        );
        Ok(())
    }

    pub fn mixed_group(&self, group_id: u16) -> Result<MixedGroup, Error> {
        let group_id = check(group_id, MIXED_GROUP_IDS, Error::InvalidMixedGroupId)?;
        let address = mixed_group_address(group_id);
        let banks = self.store.lock();
        let read = |offset| banks.get(Bank::Mirror, address + offset);
        Ok(MixedGroup {
            mixing_valve_opening: read(MIXED_GROUP_VALVE_OPENING_OFFSET),
            pump_status: read(MIXED_GROUP_PUMP_STATE_OFFSET),
            flow_temperature: dpt9001::decode(read(MIXED_GROUP_FLOW_TEMPERATURE_OFFSET)),
            return_temperature: dpt9001::decode(read(MIXED_GROUP_RETURN_TEMPERATURE_OFFSET)),
        })
    }

    pub fn outside_temperature(&self) -> OutsideTemperature {
        let banks = self.store.lock();
        OutsideTemperature {
            outside_temperature: dpt9001::decode(banks.get(Bank::Mirror, OUTSIDE_TEMPERATURE)),
            filtered_outside_temperature: dpt9001::decode(
                banks.get(Bank::Mirror, FILTERED_OUTSIDE_TEMPERATURE),
            ),
        }
    }

    pub fn notifications(&self) -> Notifications {
        let banks = self.store.lock();
        Notifications {
            hints_present: banks.get(Bank::Mirror, HINTS_PRESENT) != 0,
            warnings_present: banks.get(Bank::Mirror, WARNINGS_PRESENT) != 0,
            errors_present: banks.get(Bank::Mirror, ERRORS_PRESENT) != 0,
        }
    }

    pub fn mode(&self) -> OperationMode {
        OperationMode { mode: self.store.lock().get(Bank::Mirror, GLOBAL_OPERATION_MODE) }
    }

    pub fn set_mode(&self, mode: u16) -> Result<(), Error> {
        let mode = check(mode, OPERATION_MODES, Error::InvalidMode)?;
        self.store.lock().set(Bank::Command, GLOBAL_OPERATION_MODE, mode);
        debug!(message = "commanded operation mode", mode);
        Ok(())
    }

    pub fn status(&self) -> OperationStatus {
        OperationStatus { status: self.store.lock().get(Bank::Mirror, GLOBAL_OPERATION_STATUS) }
    }

    pub fn set_status(&self, status: u16) -> Result<(), Error> {
        let status = check(status, OPERATION_STATUSES, Error::InvalidStatus)?;
        self.store.lock().set(Bank::Command, GLOBAL_OPERATION_STATUS, status);
        debug!(message = "commanded operation status", status);
        Ok(())
    }

    pub fn dehumidifier(&self, id: u16) -> Result<Dehumidifier, Error> {
        let id = check(id, DEHUMIDIFIER_IDS, Error::InvalidDehumidifierId)?;
        let value = self.store.lock().get(Bank::Mirror, registers::dehumidifier_address(id));
        Ok(Dehumidifier { dehumidifier_status: value != 0 })
    }

    pub fn pump(&self, id: u16) -> Result<Pump, Error> {
        let id = check(id, EXTRA_PUMP_IDS, Error::InvalidPumpId)?;
        let value = self.store.lock().get(Bank::Mirror, registers::extra_pump_address(id));
        Ok(Pump { pump_status: value != 0 })
    }
}
