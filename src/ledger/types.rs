// src/ledger/types.rs
// Chain object shapes exchanged with the node.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::errors::LedgerError;

/// Graphene object id, `space.type.instance` (e.g. `1.2.345` for an account).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub space: u8,
    pub type_id: u8,
    pub instance: u64,
}

impl ObjectId {
    pub const fn new(space: u8, type_id: u8, instance: u64) -> Self {
        Self { space, type_id, instance }
    }
}

impl FromStr for ObjectId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::InvalidObjectId(s.to_string());
        let mut parts = s.trim().split('.');

        let space = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let type_id = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let instance = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self { space, type_id, instance })
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.space, self.type_id, self.instance)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// An amount of some asset, in the asset's minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    #[serde(deserialize_with = "int64_from_number_or_string")]
    pub amount: i64,
    pub asset_id: ObjectId,
}

impl AssetAmount {
    pub fn new(amount: i64, asset_id: ObjectId) -> Self {
        Self { amount, asset_id }
    }
}

// Nodes emit int64 values as JSON strings once they leave the safe double range.
fn int64_from_number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(de::Error::custom),
    }
}

/// Minimal view of an account object returned by `get_account_by_name`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountObject {
    pub id: ObjectId,
    pub name: String,
}

/// The fields of `get_dynamic_global_properties` needed to anchor a transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicGlobalProperties {
    pub head_block_number: u32,
    pub head_block_id: String,
    pub time: String,
}
