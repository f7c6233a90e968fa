pub use replication_core::{budget, checkpoint, contract, error, filter, object_keys, retry};
