//! Error taxonomy for the mapping layer.
//!
//! Every fallible operation returns [`Result`]. Callers that need to branch on
//! the failure class use [`OrmError::kind`] instead of matching variants.

use crate::identity::RdfId;
use oxigraph::model::IriParseError;
use oxigraph::store::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrmError>;

/// The coarse class of an [`OrmError`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Broken schema declarations; raised while resolving metadata.
    MetadataInvalid,
    /// Attempt to rebind an identifier that is already set.
    IdentityImmutable,
    /// Malformed query or an evaluation failure inside the store.
    QueryFault,
    /// The store is in a state the caller cannot trust (lost connection,
    /// half-replayed rollback, out-of-sequence transaction call).
    DataSourceFault,
    /// Operation invoked while the component is in the wrong state.
    IllegalState,
    /// The caller handed over something the operation cannot accept.
    IllegalArgument,
}

#[derive(Debug, Error)]
pub enum OrmError {
    #[error("invalid metadata for `{type_name}`: {message}")]
    MetadataInvalid { type_name: String, message: String },

    #[error("identity of {current} cannot be changed to {attempted}")]
    IdentityImmutable { current: RdfId, attempted: RdfId },

    #[error("query fault: {0}")]
    QueryFault(String),

    #[error("data source fault: {0}")]
    DataSourceFault(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("entity {0} already exists in the data source")]
    EntityExists(RdfId),
}

impl OrmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrmError::MetadataInvalid { .. } => ErrorKind::MetadataInvalid,
            OrmError::IdentityImmutable { .. } => ErrorKind::IdentityImmutable,
            OrmError::QueryFault(_) => ErrorKind::QueryFault,
            OrmError::DataSourceFault(_) => ErrorKind::DataSourceFault,
            OrmError::IllegalState(_) => ErrorKind::IllegalState,
            OrmError::IllegalArgument(_) | OrmError::EntityExists(_) => {
                ErrorKind::IllegalArgument
            }
        }
    }

    pub fn metadata(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        OrmError::MetadataInvalid {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        OrmError::QueryFault(message.into())
    }

    pub fn data_source(message: impl Into<String>) -> Self {
        OrmError::DataSourceFault(message.into())
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        OrmError::IllegalState(message.into())
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        OrmError::IllegalArgument(message.into())
    }
}

impl From<StorageError> for OrmError {
    fn from(e: StorageError) -> Self {
        OrmError::DataSourceFault(e.to_string())
    }
}

impl From<IriParseError> for OrmError {
    fn from(e: IriParseError) -> Self {
        OrmError::IllegalArgument(format!("invalid IRI: {}", e))
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(e: serde_json::Error) -> Self {
        OrmError::IllegalArgument(format!("invalid JSON: {}", e))
    }
}

impl From<std::io::Error> for OrmError {
    fn from(e: std::io::Error) -> Self {
        OrmError::DataSourceFault(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::NamedNode;

    #[test]
    fn kinds_follow_variants() {
        let id = RdfId::Named(NamedNode::new_unchecked("http://example.org/a"));
        assert_eq!(
            OrmError::EntityExists(id.clone()).kind(),
            ErrorKind::IllegalArgument
        );
        assert_eq!(
            OrmError::metadata("Person", "two ids").kind(),
            ErrorKind::MetadataInvalid
        );
        let err = OrmError::IdentityImmutable {
            current: id.clone(),
            attempted: RdfId::Named(NamedNode::new_unchecked("http://example.org/b")),
        };
        assert_eq!(err.kind(), ErrorKind::IdentityImmutable);
        assert!(err.to_string().contains("http://example.org/a"));
    }
}
