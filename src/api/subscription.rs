use std::pin::Pin;
use futures::Stream;
use juniper::{graphql_subscription, FieldError, GraphQLObject};

use crate::{
    model::{Link, Vote},
    prelude::*,
    store::{ChangeEvent, EventFilter, MutationType},
};
use super::Context;


type PayloadStream<T> = Pin<Box<dyn Stream<Item = Result<Option<T>, FieldError>> + Send>>;

/// The root subscription object.
pub(crate) struct Subscription;

#[graphql_subscription(context = Context)]
impl Subscription {
    /// Emits an event for every newly posted link.
    async fn new_link(context: &Context) -> PayloadStream<LinkSubscriptionPayload> {
        payload_stream(context.store().link_events(EventFilter::created_only()))
    }

    /// Emits an event for every new vote.
    async fn new_vote(context: &Context) -> PayloadStream<VoteSubscriptionPayload> {
        payload_stream(context.store().vote_events(EventFilter::created_only()))
    }
}

fn payload_stream<T, P>(events: crate::store::EventStream<T>) -> PayloadStream<P>
where
    T: Send + 'static,
    P: From<ChangeEvent<T>> + Send + 'static,
{
    events.map(|event| Ok(Some(P::from(event)))).boxed()
}

/// A change to a link.
#[derive(GraphQLObject)]
#[graphql(context = Context)]
pub(crate) struct LinkSubscriptionPayload {
    mutation: MutationType,
    node: Option<Link>,
    updated_fields: Vec<String>,
}

impl From<ChangeEvent<Link>> for LinkSubscriptionPayload {
    fn from(event: ChangeEvent<Link>) -> Self {
        Self {
            mutation: event.mutation,
            node: event.node,
            updated_fields: event.updated_fields,
        }
    }
}

/// A change to a vote.
#[derive(GraphQLObject)]
#[graphql(context = Context)]
pub(crate) struct VoteSubscriptionPayload {
    mutation: MutationType,
    node: Option<Vote>,
    updated_fields: Vec<String>,
}

impl From<ChangeEvent<Vote>> for VoteSubscriptionPayload {
    fn from(event: ChangeEvent<Vote>) -> Self {
        Self {
            mutation: event.mutation,
            node: event.node,
            updated_fields: event.updated_fields,
        }
    }
}

/// Turns the result of `juniper::resolve_into_stream` into a stream of
/// GraphQL responses, one per event: `{ "data": { "<field>": ... } }` or
/// `{ "errors": [...] }`. Events of multiple root fields are interleaved.
pub(crate) fn into_responses<'a>(
    value: juniper::Value<juniper::ValuesStream<'a>>,
) -> Pin<Box<dyn Stream<Item = serde_json::Value> + Send + 'a>> {
    use juniper::Value;

    let Value::Object(fields) = value else {
        warn!("Subscription did not resolve to an object");
        return futures::stream::empty().boxed();
    };

    let streams = fields.into_iter().map(|(name, value)| match value {
        Value::Scalar(events) => events
            .map(move |event| match event {
                Ok(data) => serde_json::json!({ "data": { name.as_str(): data } }),
                Err(e) => serde_json::json!({ "errors": [e] }),
            })
            .boxed(),
        _ => futures::stream::empty().boxed(),
    });

    futures::stream::select_all(streams).boxed()
}
