//! External service integrations

pub mod remote;
