use thiserror::Error;

/// The central error type for Steadfast.
///
/// Each layer (store, checkpoint manager, recovery coordinator) has its own
/// error enum so callers can decide whether a failure is recoverable.
#[derive(Error, Debug)]
pub enum SteadfastError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize {what}: {message}")]
    Serialization { what: &'static str, message: String },

    #[error("Failed to deserialize checkpoint {checkpoint_id}: {message}")]
    Deserialization {
        checkpoint_id: String,
        message: String,
    },

    #[error("Unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: u32, supported: u32 },

    #[error("Checkpoint {checkpoint_id} is a diff but task {task_id} has no earlier checkpoint")]
    DiffWithoutBase {
        task_id: String,
        checkpoint_id: String,
    },

    #[error("Parent checkpoint {parent_id} does not exist for task {task_id}")]
    MissingParent { task_id: String, parent_id: String },

    #[error("Checkpoint id already exists: {0}")]
    DuplicateCheckpoint(String),

    #[error("Store is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Integrity check failed for checkpoint {checkpoint_id}: expected {expected}, found {actual}")]
    IntegrityMismatch {
        checkpoint_id: String,
        expected: String,
        actual: String,
    },

    #[error("Checkpoint chain for {checkpoint_id} is broken: missing {missing}")]
    BrokenChain {
        checkpoint_id: String,
        missing: String,
    },

    #[error("Failed to encode state: {0}")]
    Encode(String),

    #[error("Failed to decode checkpoint {checkpoint_id}: {message}")]
    Decode {
        checkpoint_id: String,
        message: String,
    },

    #[error("Blocking task failed: {0}")]
    Join(String),
}

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Task {0} has no checkpoint and cannot be recovered")]
    Unrecoverable(String),

    #[error("Task {0} is not in the recovery queue")]
    NotQueued(String),

    #[error("Task {0} is already being recovered")]
    AlreadyRecovering(String),

    #[error("Task {task_id} is already resolved ({status})")]
    AlreadyResolved { task_id: String, status: String },

    #[error("Task {task_id} exhausted {attempts} recovery attempts")]
    MaxAttemptsExceeded { task_id: String, attempts: u32 },

    #[error("Executor failed for task {task_id}: {message}")]
    Executor { task_id: String, message: String },

    #[error("Coordinator is shutting down")]
    ShuttingDown,

    #[error("Invalid recovery settings: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SteadfastError>;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_INTEGRITY_ERROR: u8 = 4;

/// Determine the appropriate process exit code for an error.
pub fn get_exit_code(e: &anyhow::Error) -> u8 {
    if let Some(err) = e.downcast_ref::<SteadfastError>() {
        return match err {
            SteadfastError::Config(_)
            | SteadfastError::Recovery(RecoveryError::InvalidConfig(_)) => EXIT_CONFIG_ERROR,
            SteadfastError::Store(_) => EXIT_STORE_ERROR,
            SteadfastError::Checkpoint(inner) => checkpoint_exit_code(inner),
            _ => EXIT_ERROR,
        };
    }

    if let Some(inner) = e.downcast_ref::<CheckpointError>() {
        return checkpoint_exit_code(inner);
    }
    if e.downcast_ref::<StoreError>().is_some() {
        return EXIT_STORE_ERROR;
    }

    EXIT_ERROR
}

fn checkpoint_exit_code(err: &CheckpointError) -> u8 {
    match err {
        CheckpointError::IntegrityMismatch { .. } | CheckpointError::BrokenChain { .. } => {
            EXIT_INTEGRITY_ERROR
        }
        CheckpointError::Store(_) => EXIT_STORE_ERROR,
        _ => EXIT_ERROR,
    }
}
