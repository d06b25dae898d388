//! Definition of the GraphQL API.

use self::{
    mutation::Mutation,
    query::Query,
    subscription::Subscription,
};

pub(crate) mod err;
pub(crate) mod model;

mod context;
mod id;
mod mutation;
mod query;
mod subscription;


pub(crate) use self::{
    id::Id,
    context::Context,
    subscription::into_responses as subscription_responses,
};


/// Creates and returns the API root node.
pub(crate) fn root_node() -> RootNode {
    RootNode::new(Query, Mutation, Subscription)
}

/// Type of our API root node.
pub(crate) type RootNode = juniper::RootNode<'static, Query, Mutation, Subscription>;
