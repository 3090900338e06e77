//! Stream resilience and concurrency behavior.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mb_client::ModbusTcpClient;
use mb_common::{ClientConfig, MbError};
use mb_data::DataStore;
use mb_proto::Deframer;

use crate::acceptance::common::Station;

#[test]
fn test_sequential_requests_reuse_connection() {
    let station = Station::start(DataStore::new(0, 0, 8, 0));
    let client = station.client();

    for i in 0..10u16 {
        client.write_single_register(0, i).unwrap();
        assert_eq!(client.read_holding_registers(0, 1).unwrap(), vec![i]);
    }

    let metrics = station.handle.metrics().snapshot();
    assert_eq!(metrics.connections_accepted, 1);
    assert_eq!(metrics.frames_received, 20);

    station.handle.stop();
}

#[test]
fn test_concurrent_callers_are_serialized() {
    let station = Station::start(DataStore::new(0, 0, 4, 0));
    {
        let mut store = station.store.lock().unwrap();
        store.write_holding_registers(0, &[0x5A5A]).unwrap();
    }
    let client = Arc::new(station.client());

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for _ in 0..5 {
                    assert_eq!(
                        client.read_holding_registers(0, 1).unwrap(),
                        vec![0x5A5A]
                    );
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    station.handle.stop();
}

#[test]
fn test_pipelined_frames_answered_in_order() {
    // Two requests written back-to-back arrive as one TCP segment; the
    // responses come back in request order.
    let station = Station::start(DataStore::new(8, 0, 8, 0));
    {
        let mut store = station.store.lock().unwrap();
        store.write_holding_registers(0, &[0xCAFE]).unwrap();
    }

    let mut stream = TcpStream::connect(station.handle.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let mut both = Vec::new();
    both.extend_from_slice(&[
        0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01,
    ]);
    both.extend_from_slice(&[
        0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01,
    ]);
    stream.write_all(&both).unwrap();

    // Reuse the protocol deframer to cut the response stream apart.
    let mut received = Vec::new();
    let mut deframer = Deframer::new();
    let mut buf = [0u8; 64];
    while received.len() < 2 {
        let n = stream.read(&mut buf).unwrap();
        assert_ne!(n, 0, "server closed early");
        deframer.feed(&buf[..n], |frame| received.push(frame.to_vec()));
    }

    assert_eq!(received[0][1], 0x01);
    assert_eq!(received[0][7], 0x03);
    assert_eq!(&received[0][9..11], [0xCA, 0xFE]);
    assert_eq!(received[1][1], 0x02);
    assert_eq!(received[1][7], 0x01);

    station.handle.stop();
}

#[test]
fn test_resync_discard_then_recovery() {
    let station = Station::start(DataStore::new(0, 0, 8, 0));

    let mut stream = TcpStream::connect(station.handle.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    // A corrupt length field produces no response and no disconnect.
    stream
        .write_all(&[0x00, 0x01, 0x00, 0x00, 0xFF, 0xFF, 0x01, 0x03])
        .unwrap();
    thread::sleep(Duration::from_millis(50));

    let request = [
        0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01,
    ];
    stream.write_all(&request).unwrap();
    let mut response = [0u8; 11];
    stream.read_exact(&mut response).unwrap();
    assert_eq!(&response[0..2], [0x00, 0x02]);

    let metrics = station.handle.metrics().snapshot();
    assert_eq!(metrics.resync_discards, 1);
    assert_eq!(metrics.responses_sent, 1);

    station.handle.stop();
}

#[test]
fn test_client_times_out_against_silent_peer() {
    // A listener that accepts and never answers.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let silent = thread::spawn(move || {
        let (_stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(600));
    });

    let client = ModbusTcpClient::connect(ClientConfig {
        host: "127.0.0.1".into(),
        port,
        unit_id: 1,
        connect_timeout: Duration::from_secs(2),
        response_timeout: Duration::from_millis(200),
    })
    .unwrap();

    let err = client.read_holding_registers(0, 1).unwrap_err();
    assert_eq!(err, MbError::Timeout);
    assert_eq!(err.code(), -3);

    silent.join().unwrap();
}

#[test]
fn test_server_survives_abrupt_disconnect() {
    let station = Station::start(DataStore::new(0, 0, 8, 0));

    // A peer that connects, sends half a frame, and vanishes.
    {
        let mut stream = TcpStream::connect(station.handle.local_addr()).unwrap();
        stream.write_all(&[0x00, 0x01, 0x00]).unwrap();
    }
    thread::sleep(Duration::from_millis(50));

    // The server keeps serving new connections.
    let client = station.client();
    assert_eq!(client.read_holding_registers(0, 1).unwrap(), vec![0]);

    let metrics = station.handle.metrics().snapshot();
    assert_eq!(metrics.connections_accepted, 2);
    assert_eq!(metrics.connections_closed, 1);

    station.handle.stop();
}
