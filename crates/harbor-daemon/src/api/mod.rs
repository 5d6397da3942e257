//! API layer for harbor-daemon

pub mod rest;

pub use rest::router::create_router;
