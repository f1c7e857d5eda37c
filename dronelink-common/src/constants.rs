use log::LevelFilter;
use uuid::{uuid, Uuid};

pub const APP_ID: &str = "dronelink";

pub const DEVICE_NAME_PREFIX: &str = "DroneController";

pub const CONTROL_SERVICE_UUID: Uuid = uuid!("0000ffe0-0000-1000-8000-00805f9b34fb");
pub const CONTROL_CHARACTERISTIC_UUID: Uuid = uuid!("0000ffe1-0000-1000-8000-00805f9b34fb");

pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 10;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const LOG_FILE_NAME: &str = "dronelink.log";

pub const LOG_LEVEL: LevelFilter = LevelFilter::Info;
