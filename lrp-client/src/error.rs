//! Errors returned by the object store
use kube::core::ErrorResponse;
use std::time::Duration;
use thiserror::Error;

use crate::Verb;

/// Possible errors from a [`Store`](crate::Store) call
#[derive(Error, Debug)]
pub enum Error {
    /// The API server or transport failed the call
    #[error(transparent)]
    Kube(#[from] kube::Error),

    /// The call did not complete in time
    ///
    /// The call may still have been committed server side.
    #[error("{verb} {kind} timed out after {timeout:?}")]
    Timeout {
        verb: Verb,
        kind: String,
        timeout: Duration,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// The API server's status, when the call got that far
    pub fn response(&self) -> Option<&ErrorResponse> {
        match self {
            Error::Kube(kube::Error::Api(response)) => Some(response),
            _ => None,
        }
    }

    /// The object does not exist
    pub fn is_not_found(&self) -> bool {
        self.response().is_some_and(|r| r.code == 404)
    }

    /// The object changed since it was read
    pub fn is_conflict(&self) -> bool {
        self.response().is_some_and(|r| r.code == 409 && r.reason == "Conflict")
    }

    /// An object with the same name exists already
    pub fn is_already_exists(&self) -> bool {
        self.response().is_some_and(|r| r.code == 409 && r.reason == "AlreadyExists")
    }
}

/// Build the error the API server would have answered with
pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: message.into(),
        reason: reason.to_owned(),
        code,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_api_statuses() {
        assert!(api_error(404, "NotFound", "gone").is_not_found());
        assert!(api_error(409, "Conflict", "stale").is_conflict());
        assert!(!api_error(409, "Conflict", "stale").is_already_exists());
        assert!(api_error(409, "AlreadyExists", "dup").is_already_exists());
        assert!(!api_error(500, "InternalError", "boom").is_not_found());
    }

    #[test]
    fn timeouts_are_not_api_statuses() {
        let err = Error::Timeout {
            verb: Verb::Get,
            kind: "Pod".into(),
            timeout: Duration::from_secs(60),
        };
        assert!(err.response().is_none());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "get Pod timed out after 60s");
    }
}
