//! Operation log
//!
//! Append-only record of every operation this replica has emitted or
//! merged, in application order. Replication reads the log through
//! [`OperationLog::ops_since`] to ship a peer exactly the operations its
//! version vector has not observed.

use crate::error::Error;
use crate::time;
use crate::tree::Operation;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OperationLog {
    operations: Vec<Operation>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn extend<I>(&mut self, operations: I)
    where
        I: IntoIterator<Item = Operation>,
    {
        self.operations.extend(operations);
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations not yet observed by `version`, in application order.
    /// Per-sender order is preserved, which is all the delivery layer
    /// guarantees downstream replicas.
    pub fn ops_since(&self, version: &time::Global) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|op| !version.observed(op.local_timestamp()))
            .cloned()
            .collect()
    }

    /// Serialize the full log for persistence or bulk transfer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        bincode::serialize(self).map_err(|e| Error::Io(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        bincode::deserialize(bytes).map_err(|e| Error::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{FileType, Tree, ROOT_FILE_ID};

    fn sample_ops() -> Vec<Operation> {
        let mut tree = Tree::new(1);
        let mut lamport = time::Lamport::new(1);
        let (dir, op_a) = tree
            .create_file(ROOT_FILE_ID, "dir", FileType::Directory, &mut lamport)
            .unwrap();
        let (_, op_b) = tree
            .create_file(dir, "file.txt", FileType::Text, &mut lamport)
            .unwrap();
        vec![op_a, op_b]
    }

    #[test]
    fn test_ops_since_filters_observed_operations() {
        let ops = sample_ops();
        let mut log = OperationLog::new();
        log.extend(ops.clone());

        let mut version = time::Global::new();
        assert_eq!(log.ops_since(&version).len(), 2);

        version.observe(ops[0].local_timestamp());
        let pending = log.ops_since(&version);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], ops[1]);

        version.observe(ops[1].local_timestamp());
        assert!(log.ops_since(&version).is_empty());
    }

    #[test]
    fn test_log_round_trips_through_bytes() {
        let mut log = OperationLog::new();
        log.extend(sample_ops());

        let bytes = log.to_bytes().unwrap();
        let restored = OperationLog::from_bytes(&bytes).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(
            restored.ops_since(&time::Global::new()),
            log.ops_since(&time::Global::new())
        );
    }
}
