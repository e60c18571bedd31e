//! # mrcam-core
//!
//! Shared foundation for the mrcam camera capture pipeline: the binary
//! layouts of the shared-memory segments, the before/after counter transport
//! that moves data through them, the request correlation table used by the
//! injected module, and the key-chord matcher used by the UI.
//!
//! This crate is used by the injected module, the service, and the consumer.
//! OS-specific code is limited to mapping named segments and events
//! (`shm::windows`, `signal::windows`); everything else is plain Rust that
//! runs and tests on any host.
//!
//! # Architecture overview (for beginners)
//!
//! Three processes cooperate without ever talking over a socket:
//!
//! ```text
//!  service ──creates──► camera segment ◄──writes── injected module (in the USB host)
//!     │                      │
//!     │                      └──reads──► consumer (the UI / renderer)
//!     └──creates──► control segment ◄──writes── consumer
//! ```
//!
//! - **`protocol`** – The fixed byte layouts of each segment and the
//!   lock-free *seqlock* discipline: a writer bumps a "before" counter,
//!   writes the payload, then stores the same value into an "after" counter.
//!   A reader that sees both counters agree knows it copied a whole payload.
//!
//! - **`shm`** – Maps a layout onto named shared memory (Win32 sections on
//!   Windows, `memmap2` files elsewhere) and hands out a typed view.
//!
//! - **`signal`** – The "a new frame is ready" wake-up event.
//!
//! - **`domain`** – Pure state: install stages, unload states, and the
//!   bounded request correlation table.
//!
//! - **`keymap`** – Windows virtual-key helpers and the shortcut chord
//!   matcher.

pub mod clock;
pub mod domain;
pub mod keymap;
pub mod protocol;
pub mod shm;
pub mod signal;

pub use domain::correlation::{BufferRef, RequestTable, REQUEST_HISTORY};
pub use domain::stage::{InstallStage, UnloadState};
pub use keymap::chord::{ChordMatcher, ShortcutKeys, ShortcutTest};
pub use protocol::camera::{CameraLayout, FrameMeta};
pub use protocol::control::{ControlLayout, ControlRecord, Shortcut};
pub use protocol::plugins::{HostToPlugin, PluginToHost, PluginsLayout};
pub use protocol::seqlock::SeqRecord;
pub use shm::{SegmentError, SharedLayout, SharedSegment};
pub use signal::{AutoResetEvent, FrameSignal};
