//! Record payloads.
//!
//! One plain struct per [`ValueType`]. The log stores only the payload
//! bytes; the value type in the record metadata selects the decoder.

use serde::{Deserialize, Serialize};

use crate::{Key, Position, ValueType};

/// Lifecycle of a BPMN element inside a process instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessInstanceRecord {
    pub bpmn_process_id: String,
    pub version: i32,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
    pub element_id: String,
    pub flow_scope_key: Key,
}

/// A unit of work handed to an external worker.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_type: String,
    pub worker: String,
    pub retries: i32,
    pub deadline: u64,
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    /// Variables as a JSON document.
    pub variables: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub resource_name: String,
    pub resource: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageRecord {
    pub name: String,
    pub correlation_key: String,
    pub time_to_live_ms: u64,
    pub message_id: String,
    pub variables: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimerRecord {
    pub element_instance_key: Key,
    pub process_instance_key: Key,
    pub due_date: u64,
    pub repetitions: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub error_type: String,
    pub error_message: String,
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    pub job_key: Key,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VariableRecord {
    pub name: String,
    /// Value as a JSON document.
    pub value: String,
    pub scope_key: Key,
    pub process_instance_key: Key,
}

/// Written when processing a command failed; replaying it restores the
/// blacklist entry for the affected process instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub exception_message: String,
    pub error_event_position: Position,
    pub process_instance_key: Key,
}

/// A decoded record payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordValue {
    ProcessInstance(ProcessInstanceRecord),
    Job(JobRecord),
    Deployment(DeploymentRecord),
    Message(MessageRecord),
    Timer(TimerRecord),
    Incident(IncidentRecord),
    Variable(VariableRecord),
    Error(ErrorRecord),
}

impl RecordValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            RecordValue::ProcessInstance(_) => ValueType::ProcessInstance,
            RecordValue::Job(_) => ValueType::Job,
            RecordValue::Deployment(_) => ValueType::Deployment,
            RecordValue::Message(_) => ValueType::Message,
            RecordValue::Timer(_) => ValueType::Timer,
            RecordValue::Incident(_) => ValueType::Incident,
            RecordValue::Variable(_) => ValueType::Variable,
            RecordValue::Error(_) => ValueType::Error,
        }
    }

    /// The default value of `value_type`, used where a payload could not
    /// be decoded.
    pub fn empty(value_type: ValueType) -> Self {
        match value_type {
            ValueType::ProcessInstance => ProcessInstanceRecord::default().into(),
            ValueType::Job => JobRecord::default().into(),
            ValueType::Deployment => DeploymentRecord::default().into(),
            ValueType::Message => MessageRecord::default().into(),
            ValueType::Timer => TimerRecord::default().into(),
            ValueType::Incident => IncidentRecord::default().into(),
            ValueType::Variable => VariableRecord::default().into(),
            ValueType::Error => ErrorRecord::default().into(),
        }
    }

    /// Returns the process instance this value belongs to, if any.
    ///
    /// This is the entity that gets blacklisted when processing fails.
    pub fn process_instance_key(&self) -> Option<Key> {
        let key = match self {
            RecordValue::ProcessInstance(v) => v.process_instance_key,
            RecordValue::Job(v) => v.process_instance_key,
            RecordValue::Timer(v) => v.process_instance_key,
            RecordValue::Incident(v) => v.process_instance_key,
            RecordValue::Variable(v) => v.process_instance_key,
            RecordValue::Error(v) => v.process_instance_key,
            RecordValue::Deployment(_) | RecordValue::Message(_) => return None,
        };
        key.is_set().then_some(key)
    }
}

macro_rules! impl_from_record {
    ($($record:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$record> for RecordValue {
                fn from(value: $record) -> Self {
                    RecordValue::$variant(value)
                }
            }
        )*
    };
}

impl_from_record! {
    ProcessInstanceRecord => ProcessInstance,
    JobRecord => Job,
    DeploymentRecord => Deployment,
    MessageRecord => Message,
    TimerRecord => Timer,
    IncidentRecord => Incident,
    VariableRecord => Variable,
    ErrorRecord => Error,
}
