//! REST API endpoint modules.

pub mod access;
pub mod audit;
pub mod auth;
pub mod catalog;
pub mod gestion;
pub mod permissions;
pub mod phases;
pub mod session;
pub mod status;
pub mod subphases;
