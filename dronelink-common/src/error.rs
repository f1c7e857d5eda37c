use uuid::Uuid;

pub type Result<T> = std::result::Result<T, LinkError>;

/// Every failure of the link, its display string is what ends up in the status `error` field
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Bluetooth is unavailable: {0}")]
    Unavailable(String),

    #[error("No device found with a name starting with \"{0}\"")]
    DeviceNotFound(String),

    #[error("Failed to connect to the GATT server: {0}")]
    GattConnect(String),

    #[error("Access to service {0} was not requested when selecting the device")]
    ServiceNotAllowed(Uuid),

    #[error("Service {0} not found on device")]
    ServiceNotFound(Uuid),

    #[error("Characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Not connected to a device")]
    NotConnected,

    #[error("Invalid controller data JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot access log file: {0}")]
    LogFile(#[from] std::io::Error),

    #[error(transparent)]
    Ble(#[from] btleplug::Error),
}
