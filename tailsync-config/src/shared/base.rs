use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The replicated table name is empty.
    #[error("`table_name` cannot be empty")]
    EmptyTableName,

    /// A size, divisor or interval that must be positive is zero.
    #[error("`{0}` cannot be zero")]
    Zero(&'static str),

    /// Two thresholds are not ordered as required.
    #[error("`{lower}` ({lower_value}h) must be lower than `{upper}` ({upper_value}h)")]
    ThresholdOrder {
        lower: &'static str,
        lower_value: u64,
        upper: &'static str,
        upper_value: u64,
    },

    /// A time threshold exceeds the supported upper bound.
    #[error("`{field}` ({value}h) cannot exceed {max}h")]
    TooLarge {
        field: &'static str,
        value: u64,
        max: u64,
    },
}
