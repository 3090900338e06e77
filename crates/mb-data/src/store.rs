//! The four Modbus banks and every data-plane operation.

use std::sync::{Arc, Mutex};

use mb_common::{DataMapConfig, ExceptionCode};

use crate::bank::{BankKind, DataBank};
use crate::cell::Cell;

/// The single mutable state of the Modbus address space.
///
/// Owns the four banks; every wire operation of the dispatcher and the
/// application-side injection paths go through here.
#[derive(Debug)]
pub struct DataStore {
    coils: DataBank,
    discrete_inputs: DataBank,
    holding_registers: DataBank,
    input_registers: DataBank,
}

/// Shared handle used by the server loop and application threads. The one
/// mutex covers the whole store; cell hooks run while it is held and must
/// not call back into the store.
pub type SharedDataStore = Arc<Mutex<DataStore>>;

/// Wrap a store for sharing.
#[must_use]
pub fn shared(store: DataStore) -> SharedDataStore {
    Arc::new(Mutex::new(store))
}

impl DataStore {
    /// Create a store with the given bank sizes, all starting at address 0.
    #[must_use]
    pub fn new(
        coil_count: u16,
        discrete_count: u16,
        holding_count: u16,
        input_count: u16,
    ) -> Self {
        Self {
            coils: DataBank::new(BankKind::Coil, 0, coil_count),
            discrete_inputs: DataBank::new(BankKind::Discrete, 0, discrete_count),
            holding_registers: DataBank::new(BankKind::Holding, 0, holding_count),
            input_registers: DataBank::new(BankKind::Input, 0, input_count),
        }
    }

    /// Create a store from a configured address-space layout.
    #[must_use]
    pub fn from_config(config: &DataMapConfig) -> Self {
        Self {
            coils: DataBank::new(BankKind::Coil, config.coils.start_address, config.coils.count),
            discrete_inputs: DataBank::new(
                BankKind::Discrete,
                config.discrete_inputs.start_address,
                config.discrete_inputs.count,
            ),
            holding_registers: DataBank::new(
                BankKind::Holding,
                config.holding_registers.start_address,
                config.holding_registers.count,
            ),
            input_registers: DataBank::new(
                BankKind::Input,
                config.input_registers.start_address,
                config.input_registers.count,
            ),
        }
    }

    /// Read coils (wire function 0x01).
    pub fn read_coils(&mut self, address: u16, quantity: u16) -> Result<Vec<bool>, ExceptionCode> {
        self.coils.read_bits(address, quantity)
    }

    /// Read discrete inputs (wire function 0x02).
    pub fn read_discrete_inputs(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, ExceptionCode> {
        self.discrete_inputs.read_bits(address, quantity)
    }

    /// Read holding registers (wire functions 0x03 and 0x17).
    pub fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ExceptionCode> {
        self.holding_registers.read_words(address, quantity)
    }

    /// Read input registers (wire function 0x04).
    pub fn read_input_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ExceptionCode> {
        self.input_registers.read_words(address, quantity)
    }

    /// Write coils (wire functions 0x05 and 0x0F).
    pub fn write_coils(&mut self, address: u16, bits: &[bool]) -> Result<(), ExceptionCode> {
        self.coils.write_bits(address, bits)
    }

    /// Write discrete inputs (application side only; the wire cannot).
    pub fn write_discrete_inputs(
        &mut self,
        address: u16,
        bits: &[bool],
    ) -> Result<(), ExceptionCode> {
        self.discrete_inputs.write_bits(address, bits)
    }

    /// Write holding registers (wire functions 0x06 and 0x10).
    pub fn write_holding_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), ExceptionCode> {
        self.holding_registers.write_words(address, values)
    }

    /// Write input registers (application side only; the wire cannot).
    pub fn write_input_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), ExceptionCode> {
        self.input_registers.write_words(address, values)
    }

    /// Mask-write one holding register (wire function 0x16):
    /// `new = (old & and_mask) | (or_mask & !and_mask)`. The cell is only
    /// written when the result differs from the old value.
    pub fn mask_write_holding_register(
        &mut self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<(), ExceptionCode> {
        let cell = self
            .holding_registers
            .cell_mut(address)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        let old = cell.get();
        let new = (old & and_mask) | (or_mask & !and_mask);
        if old != new {
            cell.set(new);
        }
        Ok(())
    }

    /// Write-then-read on the holding bank (wire function 0x17).
    ///
    /// Both ranges are validated before anything happens; the write
    /// executes first, so the read reports post-write state when the
    /// ranges overlap.
    pub fn write_then_read_holding_registers(
        &mut self,
        write_address: u16,
        write_values: &[u16],
        read_address: u16,
        read_quantity: u16,
    ) -> Result<Vec<u16>, ExceptionCode> {
        if !self
            .holding_registers
            .contains(write_address, write_values.len() as u16)
            || !self.holding_registers.contains(read_address, read_quantity)
        {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        self.holding_registers
            .write_words(write_address, write_values)?;
        self.holding_registers.read_words(read_address, read_quantity)
    }

    /// One coil cell, for hook binding and direct injection.
    pub fn coil_cell_mut(&mut self, address: u16) -> Option<&mut Cell> {
        self.coils.cell_mut(address)
    }

    /// One discrete-input cell.
    pub fn discrete_input_cell_mut(&mut self, address: u16) -> Option<&mut Cell> {
        self.discrete_inputs.cell_mut(address)
    }

    /// One holding-register cell.
    pub fn holding_register_cell_mut(&mut self, address: u16) -> Option<&mut Cell> {
        self.holding_registers.cell_mut(address)
    }

    /// One input-register cell.
    pub fn input_register_cell_mut(&mut self, address: u16) -> Option<&mut Cell> {
        self.input_registers.cell_mut(address)
    }
}
