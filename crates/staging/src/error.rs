use sync_core::{EntityKind, LocalKey, RemoteId};

/// Errors raised by the staging store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Any SQLite failure (open, constraint, I/O)
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The database was written by a newer schema than this build knows
    #[error("unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchemaVersion { supported: u32, found: u32 },

    /// Writing the identity would give a key two remote ids, or a remote id
    /// two keys. The ledger is left untouched.
    #[error("identity conflict for {kind} {local_key}: offered remote id {offered}, {conflict}")]
    IdentityConflict {
        kind: EntityKind,
        local_key: LocalKey,
        offered: RemoteId,
        conflict: IdentityConflict,
    },

    /// A row read back from the store does not have the expected shape
    #[error("corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },
}

/// Which side of the ledger already holds a different pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityConflict {
    /// The local key is already mapped to another remote id
    KeyAlreadyMapped { existing: RemoteId },
    /// The remote id is already claimed by another local key
    RemoteIdClaimed { existing: LocalKey },
}

impl std::fmt::Display for IdentityConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityConflict::KeyAlreadyMapped { existing } => {
                write!(f, "key already mapped to remote id {existing}")
            }
            IdentityConflict::RemoteIdClaimed { existing } => {
                write!(f, "remote id already claimed by {existing}")
            }
        }
    }
}

impl StoreError {
    pub fn is_identity_conflict(&self) -> bool {
        matches!(self, StoreError::IdentityConflict { .. })
    }
}

pub(crate) fn persistence(err: rusqlite::Error) -> StoreError {
    StoreError::Persistence(err.to_string())
}
