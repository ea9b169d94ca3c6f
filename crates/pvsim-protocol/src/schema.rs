//! Kind-specific channel messages.
//!
//! Every module kind has its own message schema. A payload is the 4-byte
//! schema identifier (`f144`, `tdct`) followed by the JSON body, so a
//! consumer can check which schema it holds before decoding it.

use pvsim_core::ModuleKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

const ID_LEN: usize = 4;

/// A scalar log reading (`f144`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogData {
    pub source_name: String,
    pub value: f64,
    pub timestamp_unix_ns: i64,
}

/// A batch of trigger events (`tdct`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerData {
    pub name: String,
    pub timestamps: Vec<i64>,
    /// Reading attached to each event
    pub values: Vec<f64>,
    pub sequence_counter: u64,
}

/// Schema identifier at the head of a payload.
pub fn schema_id(bytes: &[u8]) -> Option<&str> {
    bytes
        .get(..ID_LEN)
        .and_then(|id| std::str::from_utf8(id).ok())
}

pub fn encode_log_data(data: &LogData) -> Result<Vec<u8>, CodecError> {
    encode(ModuleKind::F144, data)
}

pub fn decode_log_data(bytes: &[u8]) -> Result<LogData, CodecError> {
    decode(ModuleKind::F144, bytes)
}

pub fn encode_trigger_data(data: &TriggerData) -> Result<Vec<u8>, CodecError> {
    encode(ModuleKind::Tdct, data)
}

pub fn decode_trigger_data(bytes: &[u8]) -> Result<TriggerData, CodecError> {
    decode(ModuleKind::Tdct, bytes)
}

fn encode<T: Serialize>(kind: ModuleKind, data: &T) -> Result<Vec<u8>, CodecError> {
    let mut bytes = kind.as_str().as_bytes().to_vec();
    serde_json::to_writer(&mut bytes, data)?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(kind: ModuleKind, bytes: &[u8]) -> Result<T, CodecError> {
    let found = schema_id(bytes).ok_or(CodecError::Truncated)?;
    if found != kind.as_str() {
        return Err(CodecError::WrongSchema {
            expected: kind.as_str(),
            found: found.to_string(),
        });
    }
    Ok(serde_json::from_slice(&bytes[ID_LEN..])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_data_payload() {
        let data = LogData {
            source_name: "SIM_temp".to_string(),
            value: 1.25,
            timestamp_unix_ns: 1_700_000_000_000_000_000,
        };

        let bytes = encode_log_data(&data).unwrap();
        assert_eq!(schema_id(&bytes), Some("f144"));
        assert_eq!(decode_log_data(&bytes).unwrap(), data);
    }

    #[test]
    fn test_wrong_schema_is_rejected() {
        let data = TriggerData {
            name: "SIM_chopper".to_string(),
            timestamps: vec![1],
            values: vec![0.0],
            sequence_counter: 1,
        };

        let bytes = encode_trigger_data(&data).unwrap();
        match decode_log_data(&bytes) {
            Err(CodecError::WrongSchema { expected, found }) => {
                assert_eq!(expected, "f144");
                assert_eq!(found, "tdct");
            }
            other => panic!("Expected WrongSchema, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_payload() {
        assert!(matches!(decode_log_data(b"f1"), Err(CodecError::Truncated)));
    }
}
