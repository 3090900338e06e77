//! Shared helpers: a running slave plus a connected master.

#![allow(dead_code)] // Not every test file uses every helper

use std::time::Duration;

use mb_client::ModbusTcpClient;
use mb_common::{ClientConfig, ServerConfig};
use mb_data::{shared, DataStore, SharedDataStore};
use mb_server::{ModbusTcpServer, ServerHandle};

/// A slave on an ephemeral loopback port with its shared store.
pub struct Station {
    pub handle: ServerHandle,
    pub store: SharedDataStore,
}

impl Station {
    /// Start a slave around `store`.
    pub fn start(store: DataStore) -> Self {
        let store = shared(store);
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        };
        let server = ModbusTcpServer::bind(&config, SharedDataStore::clone(&store)).unwrap();
        Self {
            handle: server.spawn(),
            store,
        }
    }

    /// Connect a master to this slave.
    pub fn client(&self) -> ModbusTcpClient {
        let addr = self.handle.local_addr();
        ModbusTcpClient::connect(ClientConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            unit_id: 1,
            connect_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_secs(2),
        })
        .unwrap()
    }
}
