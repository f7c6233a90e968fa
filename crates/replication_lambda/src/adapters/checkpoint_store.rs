use async_trait::async_trait;

use crate::runtime::checkpoint::Checkpoint;

use super::StoreError;

/// Durable home of the per-run checkpoint. `save` must not return before the
/// record is durable.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, run_key: &str) -> Result<Option<Checkpoint>, StoreError>;

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;
}

pub fn checkpoint_object_key(prefix: &str, run_key: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        format!("{run_key}.json")
    } else {
        format!("{trimmed}/{run_key}.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_checkpoint_key_under_prefix() {
        assert_eq!(
            checkpoint_object_key(".replication-state/checkpoints/", "abc"),
            ".replication-state/checkpoints/abc.json"
        );
        assert_eq!(checkpoint_object_key("", "abc"), "abc.json");
    }
}
