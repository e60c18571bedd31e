//! Application layer of the service.
//!
//! # Sub-modules
//!
//! - **`lifecycle`** – The reconciling control loop: find the driver host,
//!   inject the camera module, watch it, request its removal, and apply the
//!   hub power fix whenever the consumer asks for it.  OS access goes through
//!   the [`lifecycle::ProcessScanner`], [`lifecycle::Injector`], and
//!   [`lifecycle::HubPowerRemediator`] traits so the loop is testable with
//!   in-memory doubles.

pub mod lifecycle;
