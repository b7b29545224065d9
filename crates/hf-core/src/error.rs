use thiserror::Error;

pub type HfResult<T> = Result<T, HfError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HfError {
    #[error("{what} out of range: {value} (valid: {min}..={max})")]
    OutOfRange {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },
}
