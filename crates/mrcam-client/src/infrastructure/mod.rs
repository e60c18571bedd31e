//! Infrastructure layer for the client.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `mrcam_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`segments`** – Opens the camera segment, control segment, and frame
//!   event created by the service, either as named platform objects or as
//!   files in a directory.

pub mod segments;
