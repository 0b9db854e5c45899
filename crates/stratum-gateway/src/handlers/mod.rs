//! HTTP request handlers.
//!
//! This module contains all the endpoint handlers for the master API.

pub mod internal;
pub mod listing;
pub mod maintenance;
pub mod operations;
pub mod scheduler;
