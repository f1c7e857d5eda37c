use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One analog stick reading, no range is enforced
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stick {
    pub x: f64,
    pub y: f64,
}

impl Stick {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Snapshot of the controller inputs at one point in time.
///
/// The serialized shape is the wire format the peripheral expects:
/// `{"leftStick":{"x":..,"y":..},"rightStick":{..},"buttons":{"id":bool,..}}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerData {
    pub left_stick: Stick,
    pub right_stick: Stick,
    // BTreeMap so the serialized key order doesn't depend on hashing
    pub buttons: BTreeMap<String, bool>,
}

impl ControllerData {
    pub fn new(left_stick: Stick, right_stick: Stick) -> Self {
        Self {
            left_stick,
            right_stick,
            buttons: BTreeMap::new(),
        }
    }

    pub fn with_button(mut self, id: impl Into<String>, pressed: bool) -> Self {
        self.buttons.insert(id.into(), pressed);
        self
    }

    /// Compact JSON as UTF-8 bytes, written as-is with no length prefix or delimiter
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_payload(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
