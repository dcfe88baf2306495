#![recursion_limit = "256"]

pub mod account;
pub mod auth;
pub mod classifier;
pub mod config;
pub mod crypto;
pub mod error;
pub mod github;
pub mod installation;
pub mod job;
pub mod schema;
pub mod serve;
