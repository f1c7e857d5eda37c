pub mod adapter;
pub mod btle;
pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod logger;
pub mod transport;

#[cfg(test)]
mod tests;

pub use adapter::{ConnectionAdapter, LinkStatus};
pub use btle::BtleTransport;
pub use controller::{ControllerData, Stick};
pub use error::{LinkError, Result};

/// Adapter over the system Bluetooth stack
pub type BluetoothAdapter = ConnectionAdapter<BtleTransport>;

impl BluetoothAdapter {
    pub fn from_config(config: &config::AdapterConfig) -> Self {
        let transport =
            BtleTransport::new(std::time::Duration::from_secs(config.scan_timeout_secs));

        Self::new(transport, config)
    }
}
