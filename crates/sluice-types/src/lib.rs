//! # sluice-types: Core types for `sluice`
//!
//! This crate contains the types shared by every layer of the stream
//! processor:
//! - Identity and ordering ([`PartitionId`], [`Position`], [`Key`])
//! - Temporal types ([`Timestamp`])
//! - Record classification ([`RecordKind`], [`ValueType`], [`Intent`])
//! - Record metadata ([`RecordMetadata`], [`RequestMetadata`], [`RejectionType`])
//! - Protocol versioning ([`ProtocolVersion`], [`PROTOCOL_VERSION`])
//! - Record payloads ([`RecordValue`]) and their decoder table ([`RecordValues`])

use std::{
    fmt::{Debug, Display},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

mod codec;
pub mod intent;
mod value;

pub use codec::{CodecError, RecordValues};
pub use value::{
    DeploymentRecord, ErrorRecord, IncidentRecord, JobRecord, MessageRecord,
    ProcessInstanceRecord, RecordValue, TimerRecord, VariableRecord,
};

// ============================================================================
// Identity - All Copy (small integer values)
// ============================================================================

/// Identifier of a log partition.
///
/// Every partition has its own log, its own state and its own stream
/// processor. Partition ids are encoded into the upper bits of every
/// [`Key`] generated on that partition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PartitionId(u16);

impl PartitionId {
    /// Largest partition id that still fits into the key layout.
    pub const MAX: PartitionId = PartitionId((1 << (64 - 1 - Key::LOCAL_BITS)) - 1);

    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for PartitionId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<PartitionId> for u16 {
    fn from(id: PartitionId) -> Self {
        id.0
    }
}

/// Position of a record in a partition's log.
///
/// Positions are assigned by the log on append. They are strictly
/// increasing for the lifetime of a partition; the first record has
/// position 1. [`Position::UNSET`] marks "no position" (for example the
/// source position of a client command, or the last processed position
/// of a fresh partition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position(i64);

impl Position {
    /// Marker for "no position".
    pub const UNSET: Position = Position(-1);

    /// Position assigned to the first record of a log.
    pub const FIRST: Position = Position(1);

    pub fn new(position: i64) -> Self {
        Self(position)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns true if this is a real log position (strictly positive).
    pub fn is_set(self) -> bool {
        self.0 > 0
    }

    /// Returns the position directly after this one.
    pub fn next(self) -> Self {
        Self(self.0.max(0) + 1)
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::UNSET
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Position {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Position> for i64 {
    fn from(position: Position) -> Self {
        position.0
    }
}

/// Identifier of an entity (process instance, job, timer, ...).
///
/// Keys are unique across the whole cluster because the generating
/// partition is encoded into the upper bits.
///
/// **Bit Layout** (sign bit always zero for valid keys):
/// - Upper 12 bits: `partition_id`
/// - Lower 51 bits: partition-local counter
///
/// # Examples
///
/// ```
/// # use sluice_types::{Key, PartitionId};
/// let key = Key::from_partition_and_local(PartitionId::new(3), 42);
/// assert_eq!(key.partition_id(), Some(PartitionId::new(3)));
/// assert_eq!(key.local_id(), 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(i64);

impl Key {
    /// Marker for "no key".
    pub const UNSET: Key = Key(-1);

    /// Number of bits reserved for the partition-local counter.
    pub const LOCAL_BITS: u32 = 51;

    const LOCAL_MASK: i64 = (1 << Self::LOCAL_BITS) - 1;

    pub fn new(key: i64) -> Self {
        Self(key)
    }

    /// Creates a key from a partition id and a partition-local counter.
    ///
    /// The local part is masked to [`Key::LOCAL_BITS`] bits.
    pub fn from_partition_and_local(partition_id: PartitionId, local: i64) -> Self {
        let partition_bits = i64::from(partition_id.as_u16()) << Self::LOCAL_BITS;
        Self(partition_bits | (local & Self::LOCAL_MASK))
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }

    pub fn is_set(self) -> bool {
        self.0 >= 0
    }

    /// Returns the partition that generated this key, or `None` for unset keys.
    pub fn partition_id(self) -> Option<PartitionId> {
        if self.is_set() {
            Some(PartitionId((self.0 >> Self::LOCAL_BITS) as u16))
        } else {
            None
        }
    }

    /// Returns the partition-local counter (lower 51 bits).
    pub fn local_id(self) -> i64 {
        self.0 & Self::LOCAL_MASK
    }
}

impl Default for Key {
    fn default() -> Self {
        Self::UNSET
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Key> for i64 {
    fn from(key: Key) -> Self {
        key.0
    }
}

// ============================================================================
// Timestamp - Copy (8-byte value)
// ============================================================================

/// Wall-clock time at which a record was appended, in milliseconds since
/// the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch (1970-01-01 00:00:00 UTC).
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Creates a timestamp for the current time.
    ///
    /// A system clock before the Unix epoch yields [`Timestamp::EPOCH`].
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self(duration.as_millis() as u64)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(millis: u64) -> Self {
        Self(millis)
    }
}

// ============================================================================
// Record Classification - Copy (small enums)
// ============================================================================

/// The kind of a record in the log.
///
/// Only commands are processed, only events are replayed. Rejections are
/// written by processors (or the error path) in response to commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// A request to change state.
    Command,
    /// A fact that state has changed.
    Event,
    /// A command that was refused.
    CommandRejection,
}

impl RecordKind {
    /// Number of record kinds.
    pub const COUNT: usize = 3;

    pub const ALL: [RecordKind; Self::COUNT] = [
        RecordKind::Command,
        RecordKind::Event,
        RecordKind::CommandRejection,
    ];

    /// Returns the single-byte discriminant, also used as a table index.
    pub fn as_byte(self) -> u8 {
        match self {
            RecordKind::Command => 0,
            RecordKind::Event => 1,
            RecordKind::CommandRejection => 2,
        }
    }

    /// Creates a `RecordKind` from its byte discriminant.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RecordKind::Command),
            1 => Some(RecordKind::Event),
            2 => Some(RecordKind::CommandRejection),
            _ => None,
        }
    }
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command => write!(f, "COMMAND"),
            Self::Event => write!(f, "EVENT"),
            Self::CommandRejection => write!(f, "COMMAND_REJECTION"),
        }
    }
}

/// The entity a record is about.
///
/// The set is closed: every value type has exactly one payload variant in
/// [`RecordValue`] and one decoder in [`RecordValues`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueType {
    ProcessInstance,
    Job,
    Deployment,
    Message,
    Timer,
    Incident,
    Variable,
    Error,
}

impl ValueType {
    /// Number of value types.
    pub const COUNT: usize = 8;

    pub const ALL: [ValueType; Self::COUNT] = [
        ValueType::ProcessInstance,
        ValueType::Job,
        ValueType::Deployment,
        ValueType::Message,
        ValueType::Timer,
        ValueType::Incident,
        ValueType::Variable,
        ValueType::Error,
    ];

    /// Returns the dense index of this value type (`0..COUNT`).
    pub fn index(self) -> usize {
        match self {
            ValueType::ProcessInstance => 0,
            ValueType::Job => 1,
            ValueType::Deployment => 2,
            ValueType::Message => 3,
            ValueType::Timer => 4,
            ValueType::Incident => 5,
            ValueType::Variable => 6,
            ValueType::Error => 7,
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ProcessInstance => "PROCESS_INSTANCE",
            Self::Job => "JOB",
            Self::Deployment => "DEPLOYMENT",
            Self::Message => "MESSAGE",
            Self::Timer => "TIMER",
            Self::Incident => "INCIDENT",
            Self::Variable => "VARIABLE",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// An action within a value type's vocabulary.
///
/// Intents are small integers scoped per [`ValueType`]; the named
/// constants live in [`intent`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Intent(u8);

impl Intent {
    /// Upper bound (exclusive) on intent values of any value type.
    pub const MAX_COUNT: usize = 32;

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns true if the intent fits the dense dispatch tables.
    pub fn is_in_range(self) -> bool {
        usize::from(self.0) < Self::MAX_COUNT
    }
}

impl Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for Intent {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

// ============================================================================
// Record Metadata
// ============================================================================

/// Why a command was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RejectionType {
    /// Not a rejection.
    #[default]
    NullVal,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    InvalidState,
    /// Processing the command failed unexpectedly.
    ProcessingError,
}

impl Display for RejectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NullVal => "NULL_VAL",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::InvalidState => "INVALID_STATE",
            Self::ProcessingError => "PROCESSING_ERROR",
        };
        f.write_str(name)
    }
}

/// Version of the record protocol a record was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion(u16);

impl ProtocolVersion {
    pub const fn new(version: u16) -> Self {
        Self(version)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Protocol version written and understood by this build.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(1);

/// Identifies the client request a command belongs to, so a response can be
/// routed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub request_id: u64,
    pub request_stream_id: i32,
}

/// Metadata carried by every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub kind: RecordKind,
    pub value_type: ValueType,
    pub intent: Intent,
    pub protocol_version: ProtocolVersion,
    pub rejection_type: RejectionType,
    pub rejection_reason: String,
    pub request: Option<RequestMetadata>,
}

impl RecordMetadata {
    pub fn new(kind: RecordKind, value_type: ValueType, intent: Intent) -> Self {
        Self {
            kind,
            value_type,
            intent,
            protocol_version: PROTOCOL_VERSION,
            rejection_type: RejectionType::NullVal,
            rejection_reason: String::new(),
            request: None,
        }
    }

    pub fn command(value_type: ValueType, intent: Intent) -> Self {
        Self::new(RecordKind::Command, value_type, intent)
    }

    pub fn event(value_type: ValueType, intent: Intent) -> Self {
        Self::new(RecordKind::Event, value_type, intent)
    }

    pub fn with_request(mut self, request: RequestMetadata) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_rejection(
        mut self,
        rejection_type: RejectionType,
        reason: impl Into<String>,
    ) -> Self {
        self.kind = RecordKind::CommandRejection;
        self.rejection_type = rejection_type;
        self.rejection_reason = reason.into();
        self
    }
}
