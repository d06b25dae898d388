//! API error handling.
//!
//! We define our own error to use for all resolvers. It has a `From` impl to
//! be created from store errors. This module also offers a couple macros to
//! easily create an error.
//!
//! The message is shown to API users verbatim. In addition, every error has a
//! coarse "kind" that ends up in the `extensions` of the GraphQL error, plus
//! an optional "key" that clients can use to pick a translated message.

use juniper::{FieldError, IntoFieldError, ScalarValue, graphql_value};

use crate::{prelude::*, store::StoreError};


pub(crate) type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) msg: String,
    pub(crate) kind: ApiErrorKind,
    pub(crate) key: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ApiErrorKind {
    /// The caller has no valid identity (missing/invalid token, wrong password).
    NotAuthenticated,

    /// A referenced record does not exist.
    NotFound,

    /// The request conflicts with existing data.
    Conflict,

    /// The arguments passed to an endpoint are invalid somehow.
    InvalidInput,

    /// Some server error out of control of the API user.
    InternalServerError,
}

impl ApiErrorKind {
    pub(crate) fn kind_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "AUTHENTICATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::InvalidInput => "VALIDATION_ERROR",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(src: StoreError) -> Self {
        match src {
            StoreError::UniqueViolation { constraint }
            | StoreError::ForeignKeyViolation { constraint } => {
                debug!("Unhandled constraint violation: {constraint}");
                Self {
                    msg: format!("Constraint '{constraint}' violated"),
                    kind: ApiErrorKind::InvalidInput,
                    key: None,
                }
            }
            StoreError::Backend(e) => {
                // This is the last place where detailed information about
                // the error is available.
                error!("Store error when executing query: {e:#}");
                debug!("Detailed error: {e:?}");

                Self {
                    msg: "Internal server error".into(),
                    kind: ApiErrorKind::InternalServerError,
                    key: None,
                }
            }
        }
    }
}

impl<S: ScalarValue> IntoFieldError<S> for ApiError {
    fn into_field_error(self) -> FieldError<S> {
        let ext = if let Some(key) = self.key {
            graphql_value!({
                "kind": (self.kind.kind_str()),
                "key": key,
            })
        } else {
            graphql_value!({
                "kind": (self.kind.kind_str()),
            })
        };

        FieldError::new(self.msg, ext)
    }
}


// ===== Helper macros to easily create errors ==================================================

/// Creates an `ApiError` with a `format!` like syntax.
macro_rules! api_err {
    ($kind:ident, key = $key:literal, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::api::err::ApiError {
            msg: format!($fmt $(, $arg)*),
            kind: $crate::api::err::ApiErrorKind::$kind,
            key: Some($key),
        }
    };
    ($kind:ident, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::api::err::ApiError {
            msg: format!($fmt $(, $arg)*),
            kind: $crate::api::err::ApiErrorKind::$kind,
            key: None,
        }
    };
}

macro_rules! not_authenticated {
    ($($t:tt)+) => { $crate::api::err::api_err!(NotAuthenticated, $($t)*) };
}

macro_rules! not_found {
    ($($t:tt)+) => { $crate::api::err::api_err!(NotFound, $($t)*) };
}

macro_rules! conflict {
    ($($t:tt)+) => { $crate::api::err::api_err!(Conflict, $($t)*) };
}

macro_rules! invalid_input {
    ($($t:tt)+) => { $crate::api::err::api_err!(InvalidInput, $($t)*) };
}

macro_rules! internal_server_error {
    ($($t:tt)+) => { $crate::api::err::api_err!(InternalServerError, $($t)*) };
}

pub(crate) use api_err;
pub(crate) use not_authenticated;
pub(crate) use not_found;
pub(crate) use conflict;
pub(crate) use invalid_input;
pub(crate) use internal_server_error;


// ===== Helper macro to inspect StoreError ================================================

/// Helps you map constraint violations reported by the store to specific API
/// errors (instead of a generic one). Usage:
///
/// ```ignore
/// // `result` needs to be `Result<T, StoreError>`.
/// map_store_err!(result, {
///     if constraint == "unique_user_email" => invalid_input!("email taken"),
///     // ...
/// })
/// ```
///
/// The macro returns `Result<T, ApiError>`. Unmatched errors are converted
/// with the `From<StoreError>` impl.
macro_rules! map_store_err {
    ($result:expr, { $(
        if constraint == $value:expr => $then:expr
    ),* $(,)? }) => {
        match $result {
            Ok(v) => Ok(v),
            Err(e) => {
                let e: $crate::store::StoreError = e;
                let mapped: Option<$crate::api::err::ApiError> = match e.constraint() {
                    $( Some(c) if c == $value => Some($then), )*
                    _ => None,
                };
                Err(mapped.unwrap_or_else(|| e.into()))
            }
        }
    };
}

pub(crate) use map_store_err;
