//! mrcam-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the tester binary in `main.rs` share the same module tree.
//!
//! # What does mrcam-client do? (for beginners)
//!
//! The *client* is the process that wants camera frames, typically the
//! headset UI.  It never talks to the USB driver itself.  Instead:
//!
//! 1. It opens the shared segments the service created and sets the
//!    "enable hook" flag, which tells the service to inject the camera module
//!    into the driver host.
//! 2. The module copies every completed camera transfer into the camera
//!    segment and signals the frame event.
//! 3. A background reader thread wakes on that event, takes a consistent
//!    snapshot of the frame, and parks it in a one-slot mailbox.
//! 4. The render loop calls [`CameraClient::acquire_next_frame`] and
//!    [`CameraClient::release_frame`] once per frame it draws.
//!
//! The same client also carries the control channel (feature toggles and
//! shortcut chords) and can ask the service for the USB hub power fix.
//!
//! [`CameraClient::acquire_next_frame`]: application::reader::CameraClient::acquire_next_frame
//! [`CameraClient::release_frame`]: application::reader::CameraClient::release_frame

/// Application layer: frames, the mailbox, and the reader.
pub mod application;

/// Infrastructure layer: opening the shared segments.
pub mod infrastructure;
