//! Shared protocol definitions for the Boardsync wire format.

pub mod event;
pub mod frame;
pub mod task;
