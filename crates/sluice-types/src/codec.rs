//! Payload encoding and the value-type decoder table.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{
    DeploymentRecord, ErrorRecord, IncidentRecord, JobRecord, MessageRecord,
    ProcessInstanceRecord, RecordValue, TimerRecord, ValueType, VariableRecord,
};

/// Errors from encoding or decoding record payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode {value_type} value: {source}")]
    Decode {
        value_type: ValueType,
        source: postcard::Error,
    },

    #[error("failed to encode {value_type} value: {source}")]
    Encode {
        value_type: ValueType,
        source: postcard::Error,
    },
}

type DecodeFn = fn(&[u8]) -> Result<RecordValue, postcard::Error>;

fn decode_as<T>(bytes: &[u8]) -> Result<RecordValue, postcard::Error>
where
    T: DeserializeOwned + Into<RecordValue>,
{
    postcard::from_bytes::<T>(bytes).map(Into::into)
}

fn decoder_for(value_type: ValueType) -> DecodeFn {
    match value_type {
        ValueType::ProcessInstance => decode_as::<ProcessInstanceRecord>,
        ValueType::Job => decode_as::<JobRecord>,
        ValueType::Deployment => decode_as::<DeploymentRecord>,
        ValueType::Message => decode_as::<MessageRecord>,
        ValueType::Timer => decode_as::<TimerRecord>,
        ValueType::Incident => decode_as::<IncidentRecord>,
        ValueType::Variable => decode_as::<VariableRecord>,
        ValueType::Error => decode_as::<ErrorRecord>,
    }
}

/// Immutable mapping from [`ValueType`] to payload decoder.
///
/// Built once at startup and shared by reference between the replay and
/// processing state machines.
pub struct RecordValues {
    decoders: [DecodeFn; ValueType::COUNT],
}

impl RecordValues {
    pub fn new() -> Self {
        Self {
            decoders: ValueType::ALL.map(decoder_for),
        }
    }

    /// Decodes a payload written for `value_type`.
    pub fn decode(&self, value_type: ValueType, bytes: &[u8]) -> Result<RecordValue, CodecError> {
        (self.decoders[value_type.index()])(bytes)
            .map_err(|source| CodecError::Decode { value_type, source })
    }

    /// Encodes only the payload; the variant is implied by the metadata.
    pub fn encode(value: &RecordValue) -> Result<Bytes, CodecError> {
        let encoded = match value {
            RecordValue::ProcessInstance(v) => postcard::to_allocvec(v),
            RecordValue::Job(v) => postcard::to_allocvec(v),
            RecordValue::Deployment(v) => postcard::to_allocvec(v),
            RecordValue::Message(v) => postcard::to_allocvec(v),
            RecordValue::Timer(v) => postcard::to_allocvec(v),
            RecordValue::Incident(v) => postcard::to_allocvec(v),
            RecordValue::Variable(v) => postcard::to_allocvec(v),
            RecordValue::Error(v) => postcard::to_allocvec(v),
        };
        encoded
            .map(Bytes::from)
            .map_err(|source| CodecError::Encode {
                value_type: value.value_type(),
                source,
            })
    }
}

impl Default for RecordValues {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordValues")
            .field("value_types", &ValueType::COUNT)
            .finish()
    }
}
