use lrp_core::convert;
use thiserror::Error;

/// Errors returned by the desirer, updater, stopper and getters
///
/// Every variant carries the workload identity it concerns.
#[derive(Debug, Error)]
pub enum Error {
    /// No object manages the identity
    #[error("{identity} not found")]
    NotFound { identity: String },

    /// More than one object claims the identity
    ///
    /// Never resolved automatically: some other actor broke the one object
    /// per identity rule and a human has to decide which one to keep.
    #[error("{count} objects found for {identity}, expected at most one")]
    MultipleObjects { identity: String, count: usize },

    #[error("instance index {index} is out of range for {identity} with {instances} instances")]
    InvalidInstanceIndex {
        identity: String,
        index: u32,
        instances: i32,
    },

    #[error("failed to convert {identity}: {source}")]
    Conversion {
        identity: String,
        #[source]
        source: convert::Error,
    },

    /// A store call failed during `phase`
    #[error("failed to {phase} for {identity}: {source}")]
    Store {
        phase: &'static str,
        identity: String,
        #[source]
        source: lrp_client::Error,
    },

    /// Creating the workload failed, and so did removing the secret created for it
    #[error("{create} (deleting the registry secret also failed: {cleanup})")]
    SecretCleanup {
        create: Box<Error>,
        cleanup: lrp_client::Error,
    },

    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn store(phase: &'static str, identity: impl ToString) -> impl FnOnce(lrp_client::Error) -> Self {
        let identity = identity.to_string();
        move |source| Error::Store {
            phase,
            identity,
            source,
        }
    }

    pub(crate) fn conversion(identity: impl ToString) -> impl FnOnce(convert::Error) -> Self {
        let identity = identity.to_string();
        move |source| Error::Conversion { identity, source }
    }

    fn store_error(&self) -> Option<&lrp_client::Error> {
        match self {
            Error::Store { source, .. } => Some(source),
            Error::RetriesExhausted { source, .. } => source.store_error(),
            _ => None,
        }
    }

    /// Nothing manages the identity, or the store answered not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. }) || self.store_error().is_some_and(lrp_client::Error::is_not_found)
    }

    /// The store rejected a write made against a stale version
    pub fn is_conflict(&self) -> bool {
        self.store_error().is_some_and(lrp_client::Error::is_conflict)
    }

    pub fn is_already_exists(&self) -> bool {
        self.store_error().is_some_and(lrp_client::Error::is_already_exists)
    }
}
