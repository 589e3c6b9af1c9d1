//! Transport tests for dbmcp-http-server
//!
//! Requests are driven straight into [`crate::SseSessionHandler`] with in-memory
//! bodies, and stream frames are read back through `BodyExt::frame`.

pub mod sse_transport_tests;
