use serde::{Deserialize, Serialize};

/// Description of the profiled device and process.
///
/// Stored in the session log as a JSON blob, so unknown fields from newer
/// writers are ignored and missing ones fall back to empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub name: String,
    pub platform: String,
    pub version: String,
    pub manufacturer: String,
    pub model: String,
    pub app_name: String,
}

impl DeviceInfo {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
