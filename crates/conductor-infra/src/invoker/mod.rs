//! `ActionInvoker` adapters.

pub mod http;

pub use http::HttpActionInvoker;
