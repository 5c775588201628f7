//! Serde helper serializing byte vectors as standard base64 strings.
//!
//! Usage: `#[serde(with = "crate::util::b64_bytes")]` on a `Vec<u8>` field.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&b64.encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    b64.decode(s.as_bytes()).map_err(Error::custom)
}
