//! Qube Core
//!
//! Core library for provisioning the Qube stack on AWS: every resource is
//! looked up before it is created, and identifiers flow explicitly from one
//! provisioning step to the next.

pub mod config;
pub mod ensure;
pub mod matcher;
pub mod provider;
pub mod provision;
pub mod resource;
pub mod schema;

#[cfg(test)]
pub(crate) mod mock;
