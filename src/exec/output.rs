//! The output cache record and its armored wire form.
//!
//! A record is what one execution leaves behind: the value the script put
//! in `mgvOutput`, the input records it saw, and enough identity to trace
//! it back. Records cross process and storage boundaries as an armored
//! string, `"<len>:<base64(json)>"`, safe to embed in a script literal or
//! a storage attribute.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stdout prefix on which a child script hands its record back.
pub const OUTPUT_SENTINEL: &str = "@MGVOUTPUT@";

#[derive(Debug, Error, Diagnostic)]
pub enum ArmorError {
    #[error("armored blob has no length prefix")]
    #[diagnostic(code(mangrove::exec::armor_frame))]
    MissingPrefix,

    #[error("armored blob length prefix {declared} does not match payload length {actual}")]
    #[diagnostic(
        code(mangrove::exec::armor_length),
        help("The blob was truncated or concatenated with other data.")
    )]
    LengthMismatch { declared: usize, actual: usize },

    #[error("armored blob is not valid base64: {source}")]
    #[diagnostic(code(mangrove::exec::armor_base64))]
    Base64 {
        #[source]
        source: base64::DecodeError,
    },

    #[error("armored payload is not the expected json shape: {source}")]
    #[diagnostic(code(mangrove::exec::armor_json))]
    Json {
        #[source]
        source: serde_json::Error,
    },
}

/// Armor any serializable value.
pub fn armor<T: Serialize>(value: &T) -> Result<String, ArmorError> {
    let json = serde_json::to_vec(value).map_err(|source| ArmorError::Json { source })?;
    let encoded = STANDARD.encode(json);
    Ok(format!("{}:{}", encoded.len(), encoded))
}

/// Decode an armored blob back to a value.
pub fn unarmor<T: DeserializeOwned>(blob: &str) -> Result<T, ArmorError> {
    let (prefix, payload) = blob.split_once(':').ok_or(ArmorError::MissingPrefix)?;
    let declared: usize = prefix.parse().map_err(|_| ArmorError::MissingPrefix)?;
    if declared != payload.len() {
        return Err(ArmorError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    let json = STANDARD
        .decode(payload)
        .map_err(|source| ArmorError::Base64 { source })?;
    serde_json::from_slice(&json).map_err(|source| ArmorError::Json { source })
}

/// What one successful execution cached on its node version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Whatever the script assigned to `mgvOutput`.
    #[serde(default)]
    pub value: Value,
    /// The input records the script saw, in link order.
    #[serde(default)]
    pub inputs: Vec<Value>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(default)]
    pub version: i64,
    /// Execution date, `%d/%m/%y %H:%M`.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub action: String,
    /// Resolved artifact paths, keyed by file name.
    #[serde(default)]
    pub files: FxHashMap<String, String>,
}

impl OutputRecord {
    pub fn armor(&self) -> Result<String, ArmorError> {
        armor(self)
    }

    pub fn unarmor(blob: &str) -> Result<Self, ArmorError> {
        unarmor(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> OutputRecord {
        OutputRecord {
            value: json!({"frames": 24}),
            inputs: vec![],
            name: "comp1".into(),
            type_name: "comp".into(),
            version: 1,
            date: "01/02/26 10:30".into(),
            user: "ann".into(),
            action: "render".into(),
            files: FxHashMap::default(),
        }
    }

    #[test]
    fn armor_round_trip_preserves_record() {
        let original = record();
        let blob = original.armor().unwrap();
        assert_eq!(OutputRecord::unarmor(&blob).unwrap(), original);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let blob = record().armor().unwrap();
        let cut = &blob[..blob.len() - 4];
        assert!(matches!(
            OutputRecord::unarmor(cut),
            Err(ArmorError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn type_key_round_trips_as_type() {
        let blob = record().armor().unwrap();
        let (_, payload) = blob.split_once(':').unwrap();
        let json = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        let value: Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["type"], "comp");
    }
}
