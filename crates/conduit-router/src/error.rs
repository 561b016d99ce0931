//! Router error types.

use thiserror::Error;

/// A path pattern that cannot be compiled.
#[derive(Debug, Error)]
pub enum PatternError {
    /// `:` or `*` with no name after it.
    #[error("pattern `{pattern}` has a parameter with an empty name")]
    EmptyName {
        /// The offending pattern.
        pattern: String,
    },

    /// Parameter names may only contain ASCII alphanumerics and `_`.
    #[error("pattern `{pattern}` has an invalid parameter name `{name}`")]
    InvalidName {
        /// The offending pattern.
        pattern: String,
        /// The rejected name.
        name: String,
    },

    /// The same name was captured twice.
    #[error("pattern `{pattern}` captures `{name}` more than once")]
    DuplicateName {
        /// The offending pattern.
        pattern: String,
        /// The repeated name.
        name: String,
    },

    /// A `*name` segment was followed by more segments.
    #[error("pattern `{pattern}` has a wildcard that is not the final segment")]
    WildcardNotLast {
        /// The offending pattern.
        pattern: String,
    },

    /// A `:name(` constraint was never closed within its segment.
    #[error("pattern `{pattern}` has an unterminated constraint on `{name}`")]
    UnterminatedConstraint {
        /// The offending pattern.
        pattern: String,
        /// The constrained parameter.
        name: String,
    },

    /// The constraint is not a valid regular expression.
    #[error("invalid constraint on `{name}`: {source}")]
    InvalidConstraint {
        /// The constrained parameter.
        name: String,
        /// Regex compilation error.
        #[source]
        source: regex::Error,
    },
}

/// Errors raised while registering routes or generating URLs.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The pattern failed to compile.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// A route with this name already exists.
    #[error("route name `{0}` is already registered")]
    DuplicateName(String),

    /// No route is registered under this name.
    #[error("no route named `{0}`")]
    UnknownRoute(String),

    /// `url_for` was not given a value for a captured name.
    #[error("route `{route}` requires parameter `{name}`")]
    MissingParam {
        /// Route name.
        route: String,
        /// Missing parameter.
        name: String,
    },

    /// A value supplied to `url_for` does not satisfy the parameter's shape.
    #[error("value `{value}` is not valid for parameter `{name}`")]
    InvalidParam {
        /// Parameter name.
        name: String,
        /// Rejected value.
        value: String,
    },
}
