//! Remote query dispatch to datasource HTTP APIs

pub mod client;
pub mod response;

pub use client::{
    instant_query, range_query, targets_query, Action, RemoteClient, RemoteError, RemoteResponse,
};
pub use response::{QueryData, QueryResponse, ResponseStatus, ResultType, Sample};
