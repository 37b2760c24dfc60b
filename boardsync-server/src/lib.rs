//! Boardsync development backend.
//!
//! An axum server exposing the task REST API and the `/ws` push feed,
//! backed by an in-memory task table. Used by integration tests and as
//! a local backend for client development.

pub mod config;
pub mod db;
pub mod rooms;
pub mod server;
