//! Master/slave round trips for every supported function code.

use mb_common::{ExceptionCode, MbError};
use mb_data::DataStore;

use crate::acceptance::common::Station;

#[test]
fn test_coil_write_and_read_back() {
    let station = Station::start(DataStore::new(16, 16, 16, 16));
    let client = station.client();

    let pattern = [true, false, true, false, true, false, true, false];
    client.write_multiple_coils(0, &pattern).unwrap();
    assert_eq!(client.read_coils(0, 8).unwrap(), pattern);

    client.write_single_coil(3, true).unwrap();
    assert_eq!(
        client.read_coils(0, 4).unwrap(),
        [true, false, true, true]
    );

    station.handle.stop();
}

#[test]
fn test_register_write_and_read_back() {
    let station = Station::start(DataStore::new(16, 16, 32, 16));
    let client = station.client();

    client
        .write_multiple_registers(10, &[0x1111, 0x2222, 0x3333])
        .unwrap();
    assert_eq!(
        client.read_holding_registers(10, 3).unwrap(),
        vec![0x1111, 0x2222, 0x3333]
    );

    client.write_single_register(12, 0x4444).unwrap();
    assert_eq!(
        client.read_holding_registers(12, 1).unwrap(),
        vec![0x4444]
    );

    station.handle.stop();
}

#[test]
fn test_discrete_and_input_banks_are_wire_read_only() {
    let station = Station::start(DataStore::new(8, 8, 8, 8));

    // Application-side injection is the only way these banks change.
    {
        let mut store = station.store.lock().unwrap();
        store.write_discrete_inputs(0, &[true, true]).unwrap();
        store.write_input_registers(0, &[0xABCD]).unwrap();
    }

    let client = station.client();
    assert_eq!(
        client.read_discrete_inputs(0, 2).unwrap(),
        [true, true]
    );
    assert_eq!(client.read_input_registers(0, 1).unwrap(), vec![0xABCD]);

    station.handle.stop();
}

#[test]
fn test_mask_write_scenario() {
    let station = Station::start(DataStore::new(0, 0, 4, 0));
    {
        let mut store = station.store.lock().unwrap();
        store.write_holding_registers(0, &[0x1234]).unwrap();
    }

    let client = station.client();
    client.mask_write_register(0, 0xF2F2, 0x0025).unwrap();
    assert_eq!(
        client.read_holding_registers(0, 1).unwrap(),
        vec![0x1235]
    );

    station.handle.stop();
}

#[test]
fn test_write_read_registers_sees_post_write_state() {
    let station = Station::start(DataStore::new(0, 0, 16, 0));
    {
        let mut store = station.store.lock().unwrap();
        store.write_holding_registers(0, &[1, 2, 3, 4]).unwrap();
    }

    let client = station.client();
    let values = client
        .write_read_registers(2, &[0xAA, 0xBB], 0, 4)
        .unwrap();
    assert_eq!(values, vec![1, 2, 0xAA, 0xBB]);

    station.handle.stop();
}

#[test]
fn test_out_of_range_surfaces_illegal_data_address() {
    let station = Station::start(DataStore::new(0, 0, 10, 0));
    let client = station.client();

    let err = client.read_holding_registers(0, 20).unwrap_err();
    assert_eq!(err, MbError::Exception(ExceptionCode::IllegalDataAddress));

    let err = client.write_multiple_registers(8, &[1, 2, 3]).unwrap_err();
    assert_eq!(err, MbError::Exception(ExceptionCode::IllegalDataAddress));

    let metrics = station.handle.metrics().snapshot();
    assert_eq!(metrics.exception_responses, 2);

    station.handle.stop();
}

#[test]
fn test_read_hook_projects_live_values() {
    let station = Station::start(DataStore::new(0, 0, 0, 8));
    {
        let mut store = station.store.lock().unwrap();
        // A counter standing in for a live sensor.
        store
            .input_register_cell_mut(5)
            .unwrap()
            .bind_read(|stored| stored + 1);
    }

    let client = station.client();
    assert_eq!(client.read_input_registers(5, 1).unwrap(), vec![1]);
    assert_eq!(client.read_input_registers(5, 1).unwrap(), vec![2]);
    assert_eq!(client.read_input_registers(5, 1).unwrap(), vec![3]);

    station.handle.stop();
}

#[test]
fn test_write_hook_veto_keeps_old_value() {
    let station = Station::start(DataStore::new(0, 0, 8, 0));
    {
        let mut store = station.store.lock().unwrap();
        store.write_holding_registers(0, &[100]).unwrap();
        store
            .holding_register_cell_mut(0)
            .unwrap()
            .bind_write(|proposed| if proposed > 500 { -1 } else { 0 });
    }

    let client = station.client();
    // The request still succeeds on the wire; the vetoed cell stays put.
    client.write_single_register(0, 1000).unwrap();
    assert_eq!(client.read_holding_registers(0, 1).unwrap(), vec![100]);

    client.write_single_register(0, 300).unwrap();
    assert_eq!(client.read_holding_registers(0, 1).unwrap(), vec![300]);

    station.handle.stop();
}

#[test]
fn test_application_injection_while_serving() {
    let station = Station::start(DataStore::new(0, 0, 0, 4));
    let client = station.client();

    assert_eq!(client.read_input_registers(0, 1).unwrap(), vec![0]);

    {
        let mut store = station.store.lock().unwrap();
        store.input_register_cell_mut(0).unwrap().set_stored(77);
    }
    assert_eq!(client.read_input_registers(0, 1).unwrap(), vec![77]);

    station.handle.stop();
}
