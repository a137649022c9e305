use crate::schema::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Added,
    Updated,
    Deleted,
}

impl WriteOp {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteOp::Added => "added",
            WriteOp::Updated => "updated",
            WriteOp::Deleted => "deleted",
        }
    }
}

/// Emitted once per committed write, after the transaction is durable.
#[derive(Debug, Clone)]
pub struct WriteEvent {
    pub collection: Collection,
    pub op: WriteOp,
    pub id: String,
}

/// Post-commit hook. Observers run synchronously on the writing task;
/// failures are theirs to swallow, the store never re-enters the write.
pub trait WriteObserver: Send + Sync {
    fn record_written(&self, event: &WriteEvent);
}
