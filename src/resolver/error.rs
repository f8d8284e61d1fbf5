use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("unknown table \"{0}\"")]
    UnknownTable(String),

    #[error("table alias \"{alias}\" not found for select of \"{column}\"")]
    UnknownTableAlias { alias: String, column: String },

    #[error("table \"{table}\" already aliased as \"{existing}\"")]
    ConflictingTableAlias { table: String, existing: String },

    #[error("conflicting definition for provided join alias \"{0}\"")]
    ConflictingProvidedJoin(String),

    #[error("join not found for table alias \"{0}\"")]
    JoinNotFound(String),

    #[error("join of \"{table}\" pairs {from} from-columns with {to} to-columns")]
    MismatchedJoinColumns { table: String, from: usize, to: usize },

    #[error("list field requires at least one join")]
    MissingJoin,

    #[error("conflicting values for field \"{field}\": {detail}")]
    ConflictingFieldValues { field: String, detail: String },

    /// Caller-supplied input was invalid; expected to reach the client.
    #[error("{0}")]
    UserInput(String),

    #[error("not a {expected} resolver")]
    WrongResolverKind { expected: &'static str },

    #[error("no fetch result registered for resolver")]
    MissingFetchResult,

    #[error("query execution failed: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ResolverError {
    pub fn store(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ResolverError::Store(err.into())
    }
}
