use thiserror::Error;

/// The platform could not satisfy an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("out of memory: {requested} bytes requested")]
pub struct AllocError {
    pub requested: usize,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot create {kind} `{name}`: {source}")]
    OutOfMemory {
        kind: &'static str,
        name: String,
        #[source]
        source: AllocError,
    },
}

impl SyncError {
    pub(crate) fn out_of_memory(kind: &'static str, name: &str, source: AllocError) -> Self {
        SyncError::OutOfMemory {
            kind,
            name: name.into(),
            source,
        }
    }
}
