use thiserror::Error;

use crate::manager::QueryId;

/// Errors raised by the query manager API.
///
/// A query that runs and finds nothing is not an error; it finishes with
/// [`crate::EnvQueryStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EqsError {
    #[error("query `{0}` has no options")]
    EmptyQuery(String),

    #[error("no running query with id {0}")]
    UnknownQuery(QueryId),

    #[error("query parameter `{0}` was not supplied")]
    MissingParam(String),
}

pub type Result<T> = std::result::Result<T, EqsError>;
