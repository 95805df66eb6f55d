use thiserror::Error;

/// Failures surfaced by context stores, loggers and the scoped binder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    /// The logger is not using a thread-local context class.
    #[error(
        "tmp_bind works only with loggers whose context class has been wrapped with wrap_map; \
         your context class is {class}"
    )]
    Configuration { class: String },

    /// `pop` or `unbind` named a key that is not bound.
    #[error("missing key: {0}")]
    MissingKey(String),

    /// A `key=value` binding without `=` or with an empty key.
    #[error("invalid binding: {0}")]
    InvalidBinding(String),
}

pub type Result<T> = std::result::Result<T, ContextError>;
