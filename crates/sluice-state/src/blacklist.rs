use std::sync::Arc;

use sluice_types::Key;

use crate::position::decode_i64;
use crate::{ColumnFamily, DbError, TransactionContext};

/// Process instances excluded from business processing after a failure.
///
/// Records of a blacklisted instance are still accepted into the log but
/// no processor or event applier sees them.
pub struct BlacklistState {
    db: Arc<dyn TransactionContext>,
}

impl BlacklistState {
    pub fn new(db: Arc<dyn TransactionContext>) -> Self {
        Self { db }
    }

    pub fn blacklist(&self, process_instance_key: Key) -> Result<(), DbError> {
        tracing::warn!(
            process_instance_key = %process_instance_key,
            "blacklisting process instance"
        );
        self.db.put(
            ColumnFamily::Blacklist,
            &process_instance_key.as_i64().to_be_bytes(),
            &[],
        )
    }

    pub fn is_blacklisted(&self, process_instance_key: Key) -> Result<bool, DbError> {
        self.db.exists(
            ColumnFamily::Blacklist,
            &process_instance_key.as_i64().to_be_bytes(),
        )
    }

    /// Returns every blacklisted key in ascending order.
    pub fn blacklisted_keys(&self) -> Result<Vec<Key>, DbError> {
        let mut keys = self
            .db
            .keys(ColumnFamily::Blacklist)?
            .iter()
            .map(|bytes| decode_i64(ColumnFamily::Blacklist, bytes).map(Key::new))
            .collect::<Result<Vec<_>, _>>()?;
        keys.sort();
        Ok(keys)
    }
}
