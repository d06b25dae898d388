//! GraphQL views of the domain types in `crate::model` and the operations
//! the API performs on them.

pub(crate) mod link;
pub(crate) mod user;
pub(crate) mod vote;
