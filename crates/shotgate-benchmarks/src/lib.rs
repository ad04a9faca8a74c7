//! Latency smoke checks for the gate, encode, and cache-write loop.
//!
//! The checks live in `tests/`; this crate has no runtime API.
