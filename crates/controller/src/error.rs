use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use common::ValidationError;

/// Application error, categorized by kind.
///
/// Validation and integrity errors are produced locally and returned
/// unwrapped so callers can assert on their text; dispatch errors are
/// wrapped with a fixed-string prefix naming the operation (see
/// [`Error::wrap`]). Nothing is retried in the core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A field failed validation; carries the dotted field path.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// The named entity does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// An id or unique field is already in use.
    #[error("{0}")]
    Conflict(String),
    /// The entity is still referenced by a join row.
    #[error("cannot delete {column} {id}: record in use in {table}")]
    IntegrityInUse {
        /// Foreign-key column of the blocked parent, e.g. `node_id`.
        column: &'static str,
        /// Id of the blocked parent.
        id: String,
        /// The join table holding the blocking row.
        table: &'static str,
    },
    /// No preapproval, bad certificate, or no authenticated identity.
    #[error("{0}")]
    Unauthenticated(String),
    /// Registry dial timed out or a listener is down.
    #[error("{0}")]
    Unavailable(String),
    /// State does not permit the operation (bulk-update missing members,
    /// un-stopped redeploy).
    #[error("{0}")]
    Precondition(String),
    /// A lookup that had to return something returned nothing.
    #[error("{0}")]
    Internal(String),
    /// A malformed argument escaped earlier gating.
    #[error("{0}")]
    InvalidArgument(String),
}

impl Error {
    /// Wrap the error message with an operation prefix, keeping the kind.
    ///
    /// `err.wrap("error bulk updating network interfaces")` renders as
    /// `error bulk updating network interfaces: <inner>`.
    pub fn wrap(self, prefix: &str) -> Self {
        let rewrap = |message: String| format!("{prefix}: {message}");
        match self {
            Error::Validation(inner) => {
                Error::InvalidArgument(rewrap(inner.message().to_string()))
            }
            Error::NotFound(inner) => Error::NotFound(rewrap(inner)),
            Error::Conflict(inner) => Error::Conflict(rewrap(inner)),
            err @ Error::IntegrityInUse { .. } => {
                Error::Precondition(rewrap(err.to_string()))
            }
            Error::Unauthenticated(inner) => Error::Unauthenticated(rewrap(inner)),
            Error::Unavailable(inner) => Error::Unavailable(rewrap(inner)),
            Error::Precondition(inner) => Error::Precondition(rewrap(inner)),
            Error::Internal(inner) => Error::Internal(rewrap(inner)),
            Error::InvalidArgument(inner) => Error::InvalidArgument(rewrap(inner)),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::IntegrityInUse { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Precondition(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Shorthand result for fallible controller operations.
pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(err = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::Validation(_) | Error::InvalidArgument(_) => {
                tonic::Status::invalid_argument(message)
            }
            Error::NotFound(_) => tonic::Status::not_found(message),
            Error::Conflict(_) => tonic::Status::already_exists(message),
            Error::IntegrityInUse { .. } | Error::Precondition(_) => {
                tonic::Status::failed_precondition(message)
            }
            Error::Unauthenticated(_) => tonic::Status::unauthenticated(message),
            Error::Unavailable(_) => tonic::Status::unavailable(message),
            Error::Internal(_) => tonic::Status::internal(message),
        }
    }
}

/// Rebuild an [`Error`] from a gRPC status code number carried in an
/// agent failure reply.
pub fn from_code(code: i32, message: String) -> Error {
    match tonic::Code::from(code) {
        tonic::Code::InvalidArgument => Error::InvalidArgument(message),
        tonic::Code::NotFound => Error::NotFound(message),
        tonic::Code::AlreadyExists => Error::Conflict(message),
        tonic::Code::FailedPrecondition => Error::Precondition(message),
        tonic::Code::Unauthenticated => Error::Unauthenticated(message),
        tonic::Code::Unavailable => Error::Unavailable(message),
        _ => Error::Internal(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_error_names_the_blocking_table() {
        let err = Error::IntegrityInUse {
            column: "node_id",
            id: "ef51be63-e397-4e45-a2e7-ecb5c7c752ef".into(),
            table: "nodes_dns_configs",
        };
        assert_eq!(
            err.to_string(),
            "cannot delete node_id ef51be63-e397-4e45-a2e7-ecb5c7c752ef: \
             record in use in nodes_dns_configs"
        );
    }

    #[test]
    fn wrapping_keeps_the_kind_and_prefixes_the_message() {
        let err = Error::Precondition("Network Interface if1 missing from request".into())
            .wrap("error bulk updating network interfaces");
        assert!(matches!(err, Error::Precondition(_)));
        assert_eq!(
            err.to_string(),
            "error bulk updating network interfaces: Network Interface if1 missing from request"
        );
    }

    #[test]
    fn grpc_codes_follow_the_kind() {
        let status = tonic::Status::from(Error::Unauthenticated("node not pre-approved".into()));
        assert_eq!(status.code(), tonic::Code::Unauthenticated);

        let status = tonic::Status::from(Error::Precondition("nope".into()));
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }

    #[test]
    fn validation_body_carries_the_field_path() {
        let err = Error::Validation(
            ValidationError::new("begin_port must be in [0..65535]")
                .prefixed("ip_filter")
                .prefixed("source")
                .prefixed("rules[0]"),
        );
        assert_eq!(
            err.to_string(),
            "Validation failed: rules[0].source.ip_filter.begin_port must be in [0..65535]"
        );
    }
}
