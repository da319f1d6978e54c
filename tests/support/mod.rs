//! Shared helpers for integration tests.

pub mod events;
pub mod mock_network;
pub mod socket_guard;
