use sluice_log::LogAppendEntry;

use crate::ProcessingResponse;

/// Post-commit action of a processed command.
///
/// Returns true when done; false asks for another attempt.
pub type SideEffect = Box<dyn FnMut() -> bool + Send>;

/// Everything processing one command produced, held until the command's
/// transaction committed.
#[derive(Default)]
pub struct ProcessingResult {
    records: Vec<LogAppendEntry>,
    response: Option<ProcessingResponse>,
    side_effect: Option<SideEffect>,
}

impl ProcessingResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the result for the next command, keeping allocations.
    pub fn reset(&mut self) {
        self.records.clear();
        self.response = None;
        self.side_effect = None;
    }

    pub fn append_record(&mut self, entry: LogAppendEntry) {
        self.records.push(entry);
    }

    pub fn records(&self) -> &[LogAppendEntry] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.response.is_none() && self.side_effect.is_none()
    }

    pub fn set_response(&mut self, response: ProcessingResponse) {
        self.response = Some(response);
    }

    pub fn response(&self) -> Option<&ProcessingResponse> {
        self.response.as_ref()
    }

    /// Replaces the default side effect (sending the response).
    pub fn set_side_effect(&mut self, side_effect: SideEffect) {
        self.side_effect = Some(side_effect);
    }

    pub(crate) fn side_effect_mut(&mut self) -> Option<&mut SideEffect> {
        self.side_effect.as_mut()
    }
}

impl std::fmt::Debug for ProcessingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingResult")
            .field("records", &self.records)
            .field("response", &self.response)
            .field("side_effect", &self.side_effect.is_some())
            .finish()
    }
}
