//! Upstream API access: the wire transport and the paginating client.

pub mod client;
pub mod transport;

pub use client::ApiClient;
pub use transport::{
    ApiRequest, ApiResponse, ApiTransport, FetchPage, HttpTransport, Params,
};
