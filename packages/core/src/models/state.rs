//! Lifecycle state of a data object inside a save/remove/execute operation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved attribute carrying an explicit lifecycle state on a target object.
pub const STATE_ATTRIBUTE: &str = "$state";

/// Lifecycle intent of an operation
///
/// The numeric values are part of the public contract: callers may attach
/// `"$state": 1` (insert), `2` (update) or `4` (delete) to an object to bypass
/// state inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DataObjectState {
    None = 0,
    Insert = 1,
    Update = 2,
    Delete = 4,
    Execute = 16,
}

impl DataObjectState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Read an explicit `$state` marker from an object value
    pub fn from_value(value: &Value) -> Option<Self> {
        value
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .and_then(|v| Self::try_from(v).ok())
    }

    pub fn is_write(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

impl From<DataObjectState> for u8 {
    fn from(state: DataObjectState) -> Self {
        state.as_u8()
    }
}

impl TryFrom<u8> for DataObjectState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Insert),
            2 => Ok(Self::Update),
            4 => Ok(Self::Delete),
            16 => Ok(Self::Execute),
            other => Err(format!("Invalid data object state: {}", other)),
        }
    }
}

impl std::fmt::Display for DataObjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Execute => "execute",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_from_value() {
        assert_eq!(
            DataObjectState::from_value(&json!(1)),
            Some(DataObjectState::Insert)
        );
        assert_eq!(
            DataObjectState::from_value(&json!(4)),
            Some(DataObjectState::Delete)
        );
        assert_eq!(DataObjectState::from_value(&json!(3)), None);
        assert_eq!(DataObjectState::from_value(&json!("1")), None);
    }

    #[test]
    fn test_state_serializes_as_number() {
        let value = serde_json::to_value(DataObjectState::Update).unwrap();
        assert_eq!(value, json!(2));

        let state: DataObjectState = serde_json::from_value(json!(16)).unwrap();
        assert_eq!(state, DataObjectState::Execute);
    }
}
