//! Domain types and pure logic for the Atelier image generation service.
//!
//! Nothing in this crate talks to the database or to a provider backend.
//! It holds the job lifecycle rules, the model catalog, request validation,
//! the chunked base64 codec and the binary object store abstraction.

pub mod codec;
pub mod error;
pub mod job;
pub mod params;
pub mod registry;
pub mod storage;
pub mod title;
pub mod types;
