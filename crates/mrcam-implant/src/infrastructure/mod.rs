//! Infrastructure layer of the injected module.
//!
//! `windows` holds the OS-facing adapters (import-table interposer, module
//! entry point, release-and-exit).  `slots` applies batched import-slot
//! writes with rollback.  `mock` holds recording doubles used by the unit and
//! integration tests on every host.

pub mod mock;
pub mod slots;

#[cfg(target_os = "windows")]
pub mod windows;
