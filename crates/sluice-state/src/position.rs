use std::sync::Arc;

use sluice_types::Position;

use crate::{ColumnFamily, DbError, TransactionContext};

pub(crate) const LAST_PROCESSED_KEY: &[u8] = b"LAST_PROCESSED_EVENT_KEY";

pub(crate) fn decode_i64(column_family: ColumnFamily, bytes: &[u8]) -> Result<i64, DbError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| DbError::Corrupted {
        column_family,
        reason: format!("expected 8 bytes, found {}", bytes.len()),
    })?;
    Ok(i64::from_be_bytes(raw))
}

/// Position of the last command whose processing transaction committed.
///
/// Written inside the same transaction as the command's state changes, so
/// the stored position and the stored state always agree.
pub struct LastProcessedPositionState {
    db: Arc<dyn TransactionContext>,
}

impl LastProcessedPositionState {
    pub fn new(db: Arc<dyn TransactionContext>) -> Self {
        Self { db }
    }

    /// Records `position` as processed in the current transaction.
    pub fn mark_as_processed(&self, position: Position) -> Result<(), DbError> {
        self.db.put(
            ColumnFamily::LastProcessedPosition,
            LAST_PROCESSED_KEY,
            &position.as_i64().to_be_bytes(),
        )
    }

    /// Returns the last processed position, or [`Position::UNSET`].
    pub fn last_successful_processed_position(&self) -> Result<Position, DbError> {
        match self
            .db
            .get(ColumnFamily::LastProcessedPosition, LAST_PROCESSED_KEY)?
        {
            Some(bytes) => {
                decode_i64(ColumnFamily::LastProcessedPosition, &bytes).map(Position::new)
            }
            None => Ok(Position::UNSET),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDb;

    #[test]
    fn fresh_state_is_unset() {
        let state = LastProcessedPositionState::new(Arc::new(MemoryDb::new()));
        assert_eq!(
            state.last_successful_processed_position().unwrap(),
            Position::UNSET
        );
    }

    #[test]
    fn marked_position_is_rolled_back_with_transaction() {
        let db = Arc::new(MemoryDb::new());
        let state = LastProcessedPositionState::new(db.clone());

        state.mark_as_processed(Position::new(3)).unwrap();
        db.commit().unwrap();
        state.mark_as_processed(Position::new(9)).unwrap();
        db.rollback().unwrap();

        assert_eq!(
            state.last_successful_processed_position().unwrap(),
            Position::new(3)
        );
    }

    #[test]
    fn corrupted_value_is_reported() {
        let db = Arc::new(MemoryDb::new());
        db.put(ColumnFamily::LastProcessedPosition, LAST_PROCESSED_KEY, b"xx")
            .unwrap();
        let state = LastProcessedPositionState::new(db);

        assert!(matches!(
            state.last_successful_processed_position(),
            Err(DbError::Corrupted { .. })
        ));
    }
}
