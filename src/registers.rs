//! Where the NEA SMART 2.0 system bus keeps things.
//!
//! The controller's register space is flat. Everything here is plain address arithmetic over
//! fixed constants; identifiers are expected to have been validated against the `*_IDS` ranges
//! by the caller.

use std::ops::RangeInclusive;

pub const GLOBAL_OPERATION_MODE: u16 = 1;
pub const GLOBAL_OPERATION_STATUS: u16 = 2;
pub const ERRORS_PRESENT: u16 = 3;
pub const WARNINGS_PRESENT: u16 = 5;
pub const HINTS_PRESENT: u16 = 6;
pub const OUTSIDE_TEMPERATURE: u16 = 7;
pub const FILTERED_OUTSIDE_TEMPERATURE: u16 = 8;

/// Registers spanned by a single base unit.
pub const BASE_STRIDE: u16 = 1200;
/// Registers spanned by a single zone within a base unit.
pub const ZONE_STRIDE: u16 = 100;
pub const ZONE_SETPOINT_OFFSET: u16 = 1;
pub const ZONE_TEMPERATURE_OFFSET: u16 = 2;
pub const ZONE_RELATIVE_HUMIDITY_OFFSET: u16 = 10;

/// Mixing groups are non-overlapping 4-register blocks, the first one starting at register 10.
pub const MIXED_GROUP_BASE: u16 = 6;
pub const MIXED_GROUP_STRIDE: u16 = 4;
pub const MIXED_GROUP_VALVE_OPENING_OFFSET: u16 = 0;
pub const MIXED_GROUP_PUMP_STATE_OFFSET: u16 = 1;
pub const MIXED_GROUP_FLOW_TEMPERATURE_OFFSET: u16 = 2;
pub const MIXED_GROUP_RETURN_TEMPERATURE_OFFSET: u16 = 3;

pub const DEHUMIDIFIER_BASE: u16 = 21;
pub const EXTRA_PUMP_BASE: u16 = 30;

pub const BASE_IDS: RangeInclusive<u16> = 1..=4;
pub const ZONE_IDS: RangeInclusive<u16> = 1..=12;
pub const MIXED_GROUP_IDS: RangeInclusive<u16> = 1..=3;
pub const DEHUMIDIFIER_IDS: RangeInclusive<u16> = 1..=9;
pub const EXTRA_PUMP_IDS: RangeInclusive<u16> = 1..=5;

pub const ZONE_STATES: RangeInclusive<u16> = 1..=6;
pub const OPERATION_MODES: RangeInclusive<u16> = 1..=5;
pub const OPERATION_STATUSES: RangeInclusive<u16> = 1..=6;

/// The operation state register of a zone. Other zone registers are at fixed offsets from it.
pub const fn zone_address(base_id: u16, zone_id: u16) -> u16 {
    (base_id - 1) * BASE_STRIDE + zone_id * ZONE_STRIDE
}

/// The mixing valve opening register of a mixing group. Other group registers follow it.
pub const fn mixed_group_address(group_id: u16) -> u16 {
    MIXED_GROUP_BASE + group_id * MIXED_GROUP_STRIDE
}

pub const fn dehumidifier_address(dehumidifier_id: u16) -> u16 {
    DEHUMIDIFIER_BASE + dehumidifier_id
}

pub const fn extra_pump_address(pump_id: u16) -> u16 {
    EXTRA_PUMP_BASE + pump_id
}

/// How the content of a register is to be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DataType {
    U16,
    /// A [`crate::dpt9001`] encoded number.
    Dpt9,
    /// Any non-zero value means `true`.
    Flag,
}

/// Who gets to change a register's value.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Access(u8);

impl serde::Serialize for Access {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0 & Self::R.0 == 0 { "-" } else { "R" })?;
        f.write_str(if self.0 & Self::W.0 == 0 { "-" } else { "W" })?;
        Ok(())
    }
}

impl Access {
    /// Reported by the controller, readable through the mirror bank.
    pub const R: Self = Self(1 << 0);
    /// Commanded by clients through the command bank.
    pub const W: Self = Self(1 << 1);
    pub const RW: Self = Self(Self::R.0 | Self::W.0);

    pub const fn is_writable(&self) -> bool {
        self.0 & Self::W.0 != 0
    }
}

#[derive(serde::Serialize)]
pub struct RegisterSchema {
    pub address: u16,
    pub name: String,
    pub data_type: DataType,
    pub access: Access,
    pub description: String,
}

impl RegisterSchema {
    fn new(
        address: u16,
        name: impl Into<String>,
        data_type: DataType,
        access: Access,
        description: impl Into<String>,
    ) -> Self {
        Self { address, name: name.into(), data_type, access, description: description.into() }
    }

    pub fn is_match(&self, pattern: &str) -> bool {
        let pattern = pattern.to_uppercase();
        if self.name.to_uppercase().contains(&pattern) {
            return true;
        }
        if self.description.to_uppercase().contains(&pattern) {
            return true;
        }
        if self.address.to_string().contains(&pattern) {
            return true;
        }
        return false;
    }
}

/// Every register the gateway knows a meaning for, in ascending address order.
pub fn all_registers() -> Vec<RegisterSchema> {
    use Access as A;
    use DataType as T;
    let mut registers = vec![
        RegisterSchema::new(
            GLOBAL_OPERATION_MODE,
            "MODE",
            T::U16,
            A::RW,
            "Global operation mode (1..=5)",
        ),
        RegisterSchema::new(
            GLOBAL_OPERATION_STATUS,
            "STATUS",
            T::U16,
            A::RW,
            "Global operation status (1..=6)",
        ),
        RegisterSchema::new(ERRORS_PRESENT, "ERRORS", T::Flag, A::R, "Errors present"),
        RegisterSchema::new(WARNINGS_PRESENT, "WARNINGS", T::Flag, A::R, "Warnings present"),
        RegisterSchema::new(HINTS_PRESENT, "HINTS", T::Flag, A::R, "Hints present"),
        RegisterSchema::new(
            OUTSIDE_TEMPERATURE,
            "OUTSIDE_TEMPERATURE",
            T::Dpt9,
            A::R,
            "Outside temperature (°C)",
        ),
        RegisterSchema::new(
            FILTERED_OUTSIDE_TEMPERATURE,
            "FILTERED_OUTSIDE_TEMPERATURE",
            T::Dpt9,
            A::R,
            "Filtered outside temperature (°C)",
        ),
    ];
    for group in MIXED_GROUP_IDS {
        let base = mixed_group_address(group);
        registers.extend([
            RegisterSchema::new(
                base + MIXED_GROUP_VALVE_OPENING_OFFSET,
                format!("MIXED_GROUP_{group}_VALVE_OPENING"),
                T::U16,
                A::R,
                format!("Mixing group {group} valve opening (%)"),
            ),
            RegisterSchema::new(
                base + MIXED_GROUP_PUMP_STATE_OFFSET,
                format!("MIXED_GROUP_{group}_PUMP_STATE"),
                T::U16,
                A::R,
                format!("Mixing group {group} pump state"),
            ),
            RegisterSchema::new(
                base + MIXED_GROUP_FLOW_TEMPERATURE_OFFSET,
                format!("MIXED_GROUP_{group}_FLOW_TEMPERATURE"),
                T::Dpt9,
                A::R,
                format!("Mixing group {group} flow temperature (°C)"),
            ),
            RegisterSchema::new(
                base + MIXED_GROUP_RETURN_TEMPERATURE_OFFSET,
                format!("MIXED_GROUP_{group}_RETURN_TEMPERATURE"),
                T::Dpt9,
                A::R,
                format!("Mixing group {group} return temperature (°C)"),
            ),
        ]);
    }
    for id in DEHUMIDIFIER_IDS {
        registers.push(RegisterSchema::new(
            dehumidifier_address(id),
            format!("DEHUMIDIFIER_{id}"),
            T::Flag,
            A::R,
            format!("Dehumidifier {id} running"),
        ));
    }
    for id in EXTRA_PUMP_IDS {
        registers.push(RegisterSchema::new(
            extra_pump_address(id),
            format!("EXTRA_PUMP_{id}"),
            T::Flag,
            A::R,
            format!("Extra pump {id} running"),
        ));
    }
    for base_id in BASE_IDS {
        for zone_id in ZONE_IDS {
            let zone = zone_address(base_id, zone_id);
            let name = format!("BASE_{base_id}_ZONE_{zone_id}");
            let what = format!("base {base_id} zone {zone_id}");
            registers.extend([
                RegisterSchema::new(
                    zone,
                    format!("{name}_STATE"),
                    T::U16,
                    A::RW,
                    format!("Operation state of {what} (1..=6)"),
                ),
                RegisterSchema::new(
                    zone + ZONE_SETPOINT_OFFSET,
                    format!("{name}_SETPOINT"),
                    T::Dpt9,
                    A::RW,
                    format!("Temperature setpoint of {what} (°C)"),
                ),
                RegisterSchema::new(
                    zone + ZONE_TEMPERATURE_OFFSET,
                    format!("{name}_TEMPERATURE"),
                    T::Dpt9,
                    A::R,
                    format!("Temperature of {what} (°C)"),
                ),
                RegisterSchema::new(
                    zone + ZONE_RELATIVE_HUMIDITY_OFFSET,
                    format!("{name}_RELATIVE_HUMIDITY"),
                    T::U16,
                    A::R,
                    format!("Relative humidity of {what} (%)"),
                ),
            ]);
        }
    }
    registers.sort_by_key(|r| r.address);
    registers
}
