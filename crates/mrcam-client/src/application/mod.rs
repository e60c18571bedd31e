//! Application layer of the client.
//!
//! - **`frame`** – An owned camera frame and its stereo image view.
//! - **`mailbox`** – The one-slot hand-off between the reader thread and the
//!   render loop: at most one frame in flight, each frame delivered once.
//! - **`reader`** – [`reader::CameraClient`], which owns the reader thread
//!   and the control channel.

pub mod frame;
pub mod mailbox;
pub mod reader;
