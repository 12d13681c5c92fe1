//! Gateway integration tests
//!
//! Tests for the connection pool, proxy acquisition, session lifecycle and
//! the facade operations built on them.

mod keep_alive;
mod operations;
