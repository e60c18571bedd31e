//! Win32 adapters for the injected module.
//!
//! - **`iat`** – [`iat::ImportPatcher`], an [`Interposer`] that redirects the
//!   WinUSB import slots of every loaded module.
//! - **`entry`** – `DllMain`, the replacement WinUSB functions, and the
//!   release-and-exit unloader.
//!
//! [`Interposer`]: crate::application::install::Interposer

pub mod entry;
pub mod iat;
