//! Infrastructure layer for the lifecycle service.
//!
//! Contains OS-facing adapters: process discovery, module injection, the USB
//! hub power fix, segment creation, and configuration storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `mrcam_core`, but MUST NOT be imported by the `application` layer.

pub mod inject;
pub mod process;
pub mod remediation;
pub mod segments;
pub mod storage;
