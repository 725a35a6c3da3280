//! Plumbing shared by the agripump crates: URIs, JSON helpers, timestamps,
//! cancellation and the HTTP transport used to talk to the device.

pub mod datetime;
pub mod http;
pub mod interrupt;
pub mod json;
pub mod request;
