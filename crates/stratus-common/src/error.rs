//! Error taxonomy for the reconciliation engine
//!
//! Callers (the HTTP layer in particular) need to tell three situations apart:
//! the object is missing, the object collides with an existing one, or the
//! Kubernetes API failed for some other reason. Every variant here maps onto one
//! of those buckets through [`Error::is_not_found`] and [`Error::is_conflict`].

use std::fmt;

use thiserror::Error;

/// Main error type for stratus operations
#[derive(Debug, Error)]
pub enum Error {
    /// The requested object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (StatefulSet, Job, Pod, Secret)
        kind: String,
        /// Name, identifier or GUID used for the lookup
        name: String,
    },

    /// Create was rejected because the object is already present
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
    },

    /// Optimistic concurrency check failed on update
    #[error("conflict on {kind} {name}: {message}")]
    Conflict {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
        /// Message returned by the API server
        message: String,
    },

    /// Any other Kubernetes API failure
    #[error("failed to {operation}: {source}")]
    Kube {
        /// What the engine was doing, e.g. "create statefulset"
        operation: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// More than one workload object carries the same identity labels
    #[error("multiple {kind}s found for guid {guid}")]
    MultipleWorkloads {
        /// Resource kind
        kind: String,
        /// The duplicated identifier
        guid: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Input rejected before any API call was made
    #[error("validation error: {message}")]
    Validation {
        /// Description of what is invalid
        message: String,
    },

    /// Several independent steps failed
    #[error(transparent)]
    Aggregate(MultiError),

    /// The consumer of an outbound message channel has gone away
    #[error("{0} channel closed")]
    ChannelClosed(String),
}

impl Error {
    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Classify a kube-rs error returned while operating on `kind/name`
    pub fn from_kube(
        operation: impl Into<String>,
        kind: &str,
        name: &str,
        source: kube::Error,
    ) -> Self {
        match &source {
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(kind, name),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                message: ae.message.clone(),
            },
            _ => Self::Kube {
                operation: operation.into(),
                source,
            },
        }
    }

    /// True when the object was missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for create collisions and failed optimistic-concurrency checks
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. } | Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Collects failures from independent steps
///
/// Used where one step failing must not hide another step's failure, e.g. a
/// failed job creation followed by a failed secret cleanup.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure
    pub fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    /// Record the error of `result`, if any
    pub fn record<T>(&mut self, result: Result<T, Error>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    /// True when nothing failed
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The collected causes, in the order they were recorded
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// `Ok(())` when empty, the single error when there is one, an aggregate otherwise
    pub fn into_result(mut self) -> Result<(), Error> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Aggregate(self)),
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred: ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} happened"),
            reason: reason.to_string(),
            code,
        })
    }

    /// Story: the HTTP layer maps a missing object to 404
    #[test]
    fn story_missing_object_is_not_found() {
        let err = Error::from_kube(
            "get statefulset",
            "StatefulSet",
            "abc-1",
            api_error(404, "NotFound"),
        );
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert_eq!(err.to_string(), "StatefulSet abc-1 not found");
    }

    /// Story: a second desire of the same identifier is reported as a collision
    #[test]
    fn story_duplicate_create_is_conflict() {
        let err = Error::from_kube(
            "create statefulset",
            "StatefulSet",
            "app-space-0123456789",
            api_error(409, "AlreadyExists"),
        );
        assert!(err.is_conflict());
        assert!(err.to_string().contains("already exists"));
    }

    /// Story: a stale resourceVersion on update is a conflict too, never retried here
    #[test]
    fn story_stale_update_is_conflict() {
        let err = Error::from_kube(
            "update statefulset",
            "StatefulSet",
            "web",
            api_error(409, "Conflict"),
        );
        assert!(matches!(err, Error::Conflict { .. }));
        assert!(err.is_conflict());
    }

    /// Story: other API failures keep their operation context
    #[test]
    fn story_upstream_failure_is_wrapped_with_operation() {
        let err = Error::from_kube("list pods", "Pod", "", api_error(500, "InternalError"));
        assert!(err.to_string().starts_with("failed to list pods"));
        assert!(!err.is_not_found());
        assert!(!err.is_conflict());
    }

    #[test]
    fn multi_error_reports_every_cause() {
        let mut errs = MultiError::new();
        assert!(errs.is_empty());
        errs.push(Error::validation("create-failed"));
        errs.push(Error::validation("delete-secret-failed"));
        assert_eq!(errs.errors().len(), 2);

        let err = errs.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("2 errors occurred"));
        assert!(msg.contains("create-failed"));
        assert!(msg.contains("delete-secret-failed"));
    }

    #[test]
    fn multi_error_unwraps_single_cause() {
        let mut errs = MultiError::new();
        assert_eq!(errs.record::<u8>(Ok(3)), Some(3));
        errs.record::<()>(Err(Error::not_found("Job", "task-1")));
        assert!(errs.into_result().unwrap_err().is_not_found());
        assert!(MultiError::new().into_result().is_ok());
    }
}
