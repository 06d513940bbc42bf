// src/remote/mod.rs

//! Remote execution service client and runner.

pub mod client;
pub mod runner;
pub mod transport;

pub use client::{Payload, RemoteClient, RemoteConfig, PRIVATE_KEY_ARG};
pub use runner::{RemoteRunner, RemoteRunnerOptions};
pub use transport::{
    HttpTransport, InProcessTransport, RemoteRequest, RemoteResponse, RemoteService, RequestBody,
    Transport,
};
