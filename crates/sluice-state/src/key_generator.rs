use std::sync::Arc;

use sluice_types::{Key, PartitionId};

use crate::position::decode_i64;
use crate::{ColumnFamily, DbError, TransactionContext};

const LATEST_KEY: &[u8] = b"LATEST_KEY";

/// Generates strictly increasing keys for one partition.
///
/// The latest key is stored in the transaction, so a rolled back command
/// hands out the same keys again on its next attempt, and replay can
/// restore the generator from the highest key found in the log.
pub struct KeyGenerator {
    partition_id: PartitionId,
    db: Arc<dyn TransactionContext>,
}

impl KeyGenerator {
    pub fn new(partition_id: PartitionId, db: Arc<dyn TransactionContext>) -> Self {
        Self { partition_id, db }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Returns the last handed out key, or the partition's initial key
    /// (local counter zero) if none was generated yet.
    pub fn current_key(&self) -> Result<Key, DbError> {
        match self.db.get(ColumnFamily::KeyGenerator, LATEST_KEY)? {
            Some(bytes) => decode_i64(ColumnFamily::KeyGenerator, &bytes).map(Key::new),
            None => Ok(Key::from_partition_and_local(self.partition_id, 0)),
        }
    }

    pub fn next_key(&self) -> Result<Key, DbError> {
        let next = Key::new(self.current_key()?.as_i64() + 1);
        self.store(next)?;
        Ok(next)
    }

    /// Moves the generator forward to `key`; lower keys are ignored.
    pub fn set_key_if_higher(&self, key: Key) -> Result<(), DbError> {
        if key > self.current_key()? {
            tracing::debug!(
                partition_id = %self.partition_id,
                key = %key,
                "advancing key generator"
            );
            self.store(key)?;
        }
        Ok(())
    }

    fn store(&self, key: Key) -> Result<(), DbError> {
        self.db.put(
            ColumnFamily::KeyGenerator,
            LATEST_KEY,
            &key.as_i64().to_be_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDb;
    use proptest::prelude::*;

    fn generator(partition: u16) -> KeyGenerator {
        KeyGenerator::new(PartitionId::new(partition), Arc::new(MemoryDb::new()))
    }

    #[test]
    fn first_key_belongs_to_partition() {
        let keys = generator(2);
        let key = keys.next_key().unwrap();

        assert_eq!(key.partition_id(), Some(PartitionId::new(2)));
        assert_eq!(key.local_id(), 1);
    }

    #[test]
    fn set_key_if_higher_ignores_lower_keys() {
        let keys = generator(1);
        let high = Key::from_partition_and_local(PartitionId::new(1), 50);

        keys.set_key_if_higher(high).unwrap();
        keys.set_key_if_higher(Key::from_partition_and_local(PartitionId::new(1), 10))
            .unwrap();

        assert_eq!(keys.current_key().unwrap(), high);
        assert_eq!(keys.next_key().unwrap().local_id(), 51);
    }

    proptest! {
        #[test]
        fn generated_keys_strictly_increase(count in 1usize..200, start in 0i64..1_000_000) {
            let keys = generator(3);
            keys.set_key_if_higher(Key::from_partition_and_local(PartitionId::new(3), start))
                .unwrap();

            let mut last = keys.current_key().unwrap();
            for _ in 0..count {
                let next = keys.next_key().unwrap();
                prop_assert!(next > last);
                prop_assert_eq!(next.partition_id(), Some(PartitionId::new(3)));
                last = next;
            }
        }
    }
}
