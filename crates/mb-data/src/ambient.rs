//! Process-wide default store.
//!
//! Embedding programs that cannot thread a [`SharedDataStore`] through
//! their call graph install one here once and reach it from anywhere.
//! Every operation answers [`MbError::StoreNotInitialized`] until
//! [`set_default_store`] has run.

use once_cell::sync::OnceCell;
use tracing::debug;

use mb_common::{MbError, MbResult};

use crate::cell::Cell;
use crate::store::{DataStore, SharedDataStore};

static DEFAULT_STORE: OnceCell<SharedDataStore> = OnceCell::new();

/// Install the process-wide default store. May only succeed once.
pub fn set_default_store(store: SharedDataStore) -> MbResult<()> {
    DEFAULT_STORE
        .set(store)
        .map_err(|_| MbError::Config("default store already set".into()))?;
    debug!("Default data store installed");
    Ok(())
}

/// The installed default store, if any.
#[must_use]
pub fn default_store() -> Option<SharedDataStore> {
    DEFAULT_STORE.get().cloned()
}

/// Run `f` against the default store.
fn with_store<R>(f: impl FnOnce(&mut DataStore) -> R) -> MbResult<R> {
    let store = DEFAULT_STORE.get().ok_or(MbError::StoreNotInitialized)?;
    let mut guard = store.lock().expect("store mutex poisoned");
    Ok(f(&mut guard))
}

/// Read coils from the default store.
pub fn read_coils(address: u16, quantity: u16) -> MbResult<Vec<bool>> {
    with_store(|store| store.read_coils(address, quantity))?.map_err(MbError::Exception)
}

/// Read discrete inputs from the default store.
pub fn read_discrete_inputs(address: u16, quantity: u16) -> MbResult<Vec<bool>> {
    with_store(|store| store.read_discrete_inputs(address, quantity))?.map_err(MbError::Exception)
}

/// Read holding registers from the default store.
pub fn read_holding_registers(address: u16, quantity: u16) -> MbResult<Vec<u16>> {
    with_store(|store| store.read_holding_registers(address, quantity))?.map_err(MbError::Exception)
}

/// Read input registers from the default store.
pub fn read_input_registers(address: u16, quantity: u16) -> MbResult<Vec<u16>> {
    with_store(|store| store.read_input_registers(address, quantity))?.map_err(MbError::Exception)
}

/// Write coils in the default store.
pub fn write_coils(address: u16, bits: &[bool]) -> MbResult<()> {
    with_store(|store| store.write_coils(address, bits))?.map_err(MbError::Exception)
}

/// Write discrete inputs in the default store.
pub fn write_discrete_inputs(address: u16, bits: &[bool]) -> MbResult<()> {
    with_store(|store| store.write_discrete_inputs(address, bits))?.map_err(MbError::Exception)
}

/// Write holding registers in the default store.
pub fn write_holding_registers(address: u16, values: &[u16]) -> MbResult<()> {
    with_store(|store| store.write_holding_registers(address, values))?.map_err(MbError::Exception)
}

/// Write input registers in the default store.
pub fn write_input_registers(address: u16, values: &[u16]) -> MbResult<()> {
    with_store(|store| store.write_input_registers(address, values))?.map_err(MbError::Exception)
}

/// Mask-write one holding register in the default store.
pub fn mask_write_holding_register(address: u16, and_mask: u16, or_mask: u16) -> MbResult<()> {
    with_store(|store| store.mask_write_holding_register(address, and_mask, or_mask))?
        .map_err(MbError::Exception)
}

/// Write-then-read on the default store's holding bank.
pub fn write_then_read_holding_registers(
    write_address: u16,
    write_values: &[u16],
    read_address: u16,
    read_quantity: u16,
) -> MbResult<Vec<u16>> {
    with_store(|store| {
        store.write_then_read_holding_registers(
            write_address,
            write_values,
            read_address,
            read_quantity,
        )
    })?
    .map_err(MbError::Exception)
}

/// Run `f` against one coil cell of the default store, for hook binding
/// or direct injection. `f` must not call back into the store.
pub fn with_coil_cell<R>(address: u16, f: impl FnOnce(&mut Cell) -> R) -> MbResult<R> {
    with_store(|store| {
        store
            .coil_cell_mut(address)
            .map(f)
            .ok_or(MbError::Exception(mb_common::ExceptionCode::IllegalDataAddress))
    })?
}

/// Run `f` against one discrete-input cell of the default store.
pub fn with_discrete_input_cell<R>(address: u16, f: impl FnOnce(&mut Cell) -> R) -> MbResult<R> {
    with_store(|store| {
        store
            .discrete_input_cell_mut(address)
            .map(f)
            .ok_or(MbError::Exception(mb_common::ExceptionCode::IllegalDataAddress))
    })?
}

/// Run `f` against one holding-register cell of the default store.
pub fn with_holding_register_cell<R>(address: u16, f: impl FnOnce(&mut Cell) -> R) -> MbResult<R> {
    with_store(|store| {
        store
            .holding_register_cell_mut(address)
            .map(f)
            .ok_or(MbError::Exception(mb_common::ExceptionCode::IllegalDataAddress))
    })?
}

/// Run `f` against one input-register cell of the default store.
pub fn with_input_register_cell<R>(address: u16, f: impl FnOnce(&mut Cell) -> R) -> MbResult<R> {
    with_store(|store| {
        store
            .input_register_cell_mut(address)
            .map(f)
            .ok_or(MbError::Exception(mb_common::ExceptionCode::IllegalDataAddress))
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::shared;

    // The default store is process-global, so its whole lifecycle lives in
    // one test to keep ordering deterministic.
    #[test]
    fn test_ambient_lifecycle() {
        // Nothing installed yet: the -1 sentinel surfaces everywhere.
        let err = read_holding_registers(0, 1).unwrap_err();
        assert_eq!(err, MbError::StoreNotInitialized);
        assert_eq!(err.code(), -1);
        assert!(default_store().is_none());
        assert_eq!(
            write_coils(0, &[true]).unwrap_err(),
            MbError::StoreNotInitialized
        );

        set_default_store(shared(DataStore::new(8, 8, 8, 8))).unwrap();
        assert!(default_store().is_some());

        // Install is once-only.
        assert!(set_default_store(shared(DataStore::new(1, 1, 1, 1))).is_err());

        write_holding_registers(0, &[0x0102, 0x0304]).unwrap();
        assert_eq!(
            read_holding_registers(0, 2).unwrap(),
            vec![0x0102, 0x0304]
        );

        write_coils(2, &[true]).unwrap();
        assert_eq!(read_coils(2, 1).unwrap(), vec![true]);

        write_discrete_inputs(0, &[true, false]).unwrap();
        assert_eq!(read_discrete_inputs(0, 2).unwrap(), vec![true, false]);

        write_input_registers(1, &[42]).unwrap();
        assert_eq!(read_input_registers(1, 1).unwrap(), vec![42]);

        mask_write_holding_register(0, 0x00FF, 0xAA00).unwrap();
        assert_eq!(read_holding_registers(0, 1).unwrap(), vec![0xAA02]);

        let values = write_then_read_holding_registers(4, &[7, 8], 4, 2).unwrap();
        assert_eq!(values, vec![7, 8]);

        // Hook binding through the cell closures.
        with_input_register_cell(3, |cell| cell.bind_read(|stored| stored + 1)).unwrap();
        assert_eq!(read_input_registers(3, 1).unwrap(), vec![1]);
        assert_eq!(read_input_registers(3, 1).unwrap(), vec![2]);

        // Out-of-range cells and runs surface the wire exception.
        assert_eq!(
            with_coil_cell(100, |_| ()).unwrap_err(),
            MbError::Exception(mb_common::ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            read_coils(0, 100).unwrap_err().code(),
            i32::from(mb_common::ExceptionCode::IllegalDataAddress.as_byte())
        );
    }
}
