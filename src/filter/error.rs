use thiserror::Error;

/// Rejections raised while rendering a query to SQL. Every identifier is
/// checked before it is quoted into the statement.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("'{0}' is not a valid table name")]
    InvalidTableName(String),

    #[error("'{0}' is not a valid column name")]
    InvalidColumn(String),

    #[error("Malformed condition: {0}")]
    InvalidWhereClause(String),

    #[error("Operator {0} is not supported")]
    UnsupportedOperator(String),

    #[error("Bad operand: {0}")]
    InvalidOperatorData(String),

    #[error("Invalid paging: {0}")]
    InvalidPaging(String),
}
