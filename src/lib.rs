//! Fixtured library
//!
//! TCP ingestion of test-fixture result streams: stream framing, XML
//! decoding, and landing-directory file copies.

pub mod cli;
pub mod config;
pub mod copy;
pub mod decode;
pub mod dispatch;
pub mod events;
pub mod frame;
pub mod ingest_log;
pub mod logger;
pub mod server;
