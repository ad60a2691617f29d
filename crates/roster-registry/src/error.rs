//! Error types for registry operations.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors returned to the transport layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("instance {app}/{id} is not registered")]
    NotRegistered { app: String, id: String },

    #[error("lease for instance {app}/{id} has been cancelled")]
    LeaseCancelled { app: String, id: String },

    #[error("instance {app}/{id} resolved to UNKNOWN and must re-register")]
    ReregistrationRequired { app: String, id: String },

    #[error("instance id {id} is already registered by app {registered_app}, not {app}")]
    AppMismatch {
        id: String,
        registered_app: String,
        app: String,
    },
}

impl RegistryError {
    pub(crate) fn not_registered(app: &str, id: &str) -> Self {
        RegistryError::NotRegistered {
            app: app.to_string(),
            id: id.to_string(),
        }
    }

    pub(crate) fn lease_cancelled(app: &str, id: &str) -> Self {
        RegistryError::LeaseCancelled {
            app: app.to_string(),
            id: id.to_string(),
        }
    }

    pub(crate) fn app_mismatch(id: &str, registered_app: &str, app: &str) -> Self {
        RegistryError::AppMismatch {
            id: id.to_string(),
            registered_app: registered_app.to_string(),
            app: app.to_string(),
        }
    }

    pub(crate) fn reregistration_required(app: &str, id: &str) -> Self {
        RegistryError::ReregistrationRequired {
            app: app.to_string(),
            id: id.to_string(),
        }
    }
}
