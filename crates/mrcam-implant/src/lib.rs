//! mrcam-implant library entry point.
//!
//! Built twice: as a `cdylib` that the service loads into the USB driver host
//! process, and as an `rlib` so the interception and install state machines
//! are testable on any host.
//!
//! The OS-facing half (`infrastructure::windows`) provides the module entry
//! point, the import-table interposer, and the release-and-exit primitive.
//! Everything in `application` is plain Rust driven through traits.

pub mod application;
pub mod infrastructure;
