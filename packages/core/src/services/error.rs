//! Service Layer Error Types
//!
//! `TreeServiceError` is the error every `TreeService` operation returns. Each
//! variant maps to exactly one [`ErrorKind`], which transports use to pick a
//! status code.

use std::fmt;

use thiserror::Error;

use crate::models::ValidationError;
use crate::operations::error::{EntityKind, MutationError};

/// Failure category of a service operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    CrossTreeViolation,
    CircularReference,
    AlreadyLinked,
    NotLinked,
    PermissionDenied,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::CrossTreeViolation => "cross_tree_violation",
            ErrorKind::CircularReference => "circular_reference",
            ErrorKind::AlreadyLinked => "already_linked",
            ErrorKind::NotLinked => "not_linked",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// Service operation errors
///
/// Structural failures come straight from the mutation protocol; store
/// failures are always reported as `Internal` with the failing step as
/// context.
#[derive(Error, Debug)]
pub enum TreeServiceError {
    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error("Principal '{principal}' may not edit tree '{tree_id}'")]
    PermissionDenied { tree_id: String, principal: String },

    /// Persistence or authorization backend failed
    #[error("Store operation failed: {context}")]
    Store {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl TreeServiceError {
    pub fn tree_not_found(id: impl Into<String>) -> Self {
        MutationError::tree_not_found(id).into()
    }

    pub fn node_not_found(id: impl Into<String>) -> Self {
        MutationError::node_not_found(id).into()
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        MutationError::invalid_argument(msg).into()
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        MutationError::internal(msg).into()
    }

    pub fn permission_denied(tree_id: impl Into<String>, principal: impl Into<String>) -> Self {
        Self::PermissionDenied {
            tree_id: tree_id.into(),
            principal: principal.into(),
        }
    }

    pub fn store(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Store {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TreeServiceError::Mutation(err) => match err {
                MutationError::NotFound { .. } => ErrorKind::NotFound,
                MutationError::InvalidArgument(_) => ErrorKind::InvalidArgument,
                MutationError::CrossTreeViolation { .. } => ErrorKind::CrossTreeViolation,
                MutationError::CircularReference { .. } => ErrorKind::CircularReference,
                MutationError::AlreadyLinked { .. } => ErrorKind::AlreadyLinked,
                MutationError::NotLinked { .. } => ErrorKind::NotLinked,
                MutationError::Internal(_) => ErrorKind::Internal,
            },
            TreeServiceError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            TreeServiceError::Store { .. } => ErrorKind::Internal,
        }
    }

    /// True for a `NotFound` on the given entity kind
    pub fn is_not_found(&self, entity: EntityKind) -> bool {
        matches!(
            self,
            TreeServiceError::Mutation(MutationError::NotFound { entity: found, .. }) if *found == entity
        )
    }
}

impl From<ValidationError> for TreeServiceError {
    fn from(err: ValidationError) -> Self {
        MutationError::from(err).into()
    }
}

/// Attach service context to a store result
pub(crate) trait StoreContext<T> {
    fn store_context(self, context: impl Into<String>) -> Result<T, TreeServiceError>;
}

impl<T> StoreContext<T> for anyhow::Result<T> {
    fn store_context(self, context: impl Into<String>) -> Result<T, TreeServiceError> {
        self.map_err(|source| TreeServiceError::store(context, source))
    }
}
