//! Dispatch table from (record kind, value type, intent) to processor.
//!
//! Processors live once in an arena; the table is a flat array of arena
//! indices addressed by
//!
//! ```text
//! kind * ValueType::COUNT * Intent::MAX_COUNT + value_type * Intent::MAX_COUNT + intent
//! ```
//!
//! so lookup is a single index computation. One processor may serve many
//! slots, yet lifecycle broadcast reaches it exactly once.

use std::fmt::Display;

use sluice_types::{Intent, RecordKind, ValueType};
use thiserror::Error;

use crate::RecordProcessor;

const SLOT_COUNT: usize = RecordKind::COUNT * ValueType::COUNT * Intent::MAX_COUNT;

/// Handle of a processor inside a [`RecordProcessorMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorId(usize);

impl Display for ProcessorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("a processor is already registered for {kind} {value_type} intent {intent}")]
    Duplicate {
        kind: RecordKind,
        value_type: ValueType,
        intent: Intent,
    },

    #[error("intent {intent} of {value_type} does not fit the dispatch table")]
    IntentOutOfRange { value_type: ValueType, intent: Intent },

    #[error("unknown processor {0}")]
    UnknownProcessor(ProcessorId),
}

/// Maps record classifications to the processor that handles them.
pub struct RecordProcessorMap {
    processors: Vec<Box<dyn RecordProcessor>>,
    slots: Vec<Option<ProcessorId>>,
}

impl RecordProcessorMap {
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
            slots: vec![None; SLOT_COUNT],
        }
    }

    fn slot(kind: RecordKind, value_type: ValueType, intent: Intent) -> Option<usize> {
        intent.is_in_range().then(|| {
            usize::from(kind.as_byte()) * ValueType::COUNT * Intent::MAX_COUNT
                + value_type.index() * Intent::MAX_COUNT
                + usize::from(intent.as_u8())
        })
    }

    /// Adds a processor without binding it to any slot yet.
    pub fn insert(&mut self, processor: impl RecordProcessor + 'static) -> ProcessorId {
        self.processors.push(Box::new(processor));
        ProcessorId(self.processors.len() - 1)
    }

    /// Binds an inserted processor to a slot.
    pub fn register(
        &mut self,
        kind: RecordKind,
        value_type: ValueType,
        intent: Intent,
        id: ProcessorId,
    ) -> Result<(), RegistrationError> {
        if id.0 >= self.processors.len() {
            return Err(RegistrationError::UnknownProcessor(id));
        }
        let slot = Self::slot(kind, value_type, intent)
            .ok_or(RegistrationError::IntentOutOfRange { value_type, intent })?;
        if self.slots[slot].is_some() {
            return Err(RegistrationError::Duplicate {
                kind,
                value_type,
                intent,
            });
        }
        self.slots[slot] = Some(id);
        Ok(())
    }

    /// Inserts `processor` and binds it to a single slot.
    pub fn register_processor(
        &mut self,
        kind: RecordKind,
        value_type: ValueType,
        intent: Intent,
        processor: impl RecordProcessor + 'static,
    ) -> Result<ProcessorId, RegistrationError> {
        let id = self.insert(processor);
        if let Err(error) = self.register(kind, value_type, intent, id) {
            self.processors.pop();
            return Err(error);
        }
        Ok(id)
    }

    /// Builder-style [`register_processor`](Self::register_processor) for
    /// commands.
    pub fn with_command_processor(
        mut self,
        value_type: ValueType,
        intent: Intent,
        processor: impl RecordProcessor + 'static,
    ) -> Result<Self, RegistrationError> {
        self.register_processor(RecordKind::Command, value_type, intent, processor)?;
        Ok(self)
    }

    pub fn lookup(
        &self,
        kind: RecordKind,
        value_type: ValueType,
        intent: Intent,
    ) -> Option<ProcessorId> {
        Self::slot(kind, value_type, intent).and_then(|slot| self.slots[slot])
    }

    pub fn get_mut(&mut self, id: ProcessorId) -> Option<&mut Box<dyn RecordProcessor>> {
        self.processors.get_mut(id.0)
    }

    /// Every inserted processor, each exactly once.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn RecordProcessor>> {
        self.processors.iter_mut()
    }

    /// Number of distinct processors.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl Default for RecordProcessorMap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordProcessorMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordProcessorMap")
            .field("processors", &self.processors.len())
            .field("registrations", &self.slots.iter().flatten().count())
            .finish()
    }
}
