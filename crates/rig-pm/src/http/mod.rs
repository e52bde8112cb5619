//! HTTP transport with retry and conditional-request support.

mod client;

pub use client::{Download, HttpClient, HttpClientConfig, HttpError, Validators};
