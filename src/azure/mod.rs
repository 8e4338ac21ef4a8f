//! Azure resource provisioning.
//!
//! This module owns the boundary to the cloud:
//! - [`api`] - request/response types and the [`RemoteApi`] trait
//! - [`commands`] - translation of requests into `az` arguments
//! - [`cli`] - [`AzCli`], running `az` as a child process
//! - [`memory`] - [`InMemoryApi`], a stateful stand-in for tests and dry runs

mod api;
mod cli;
mod commands;
mod memory;

// Re-export public types and functions
pub use api::{
    name_from_id, Action, Describe, Params, RemoteApi, Request, ResourceId, ResourceKind,
    Response, NOT_FOUND_STATUS,
};
pub use cli::AzCli;
pub use commands::{build as build_az_command, AzCommand};
pub use memory::{Call, InMemoryApi};
