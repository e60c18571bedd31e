//! Pure state shared by the injected module, the service, and the consumer.
//!
//! - **`stage`** – The numbered install/removal stages the injected module
//!   reports through the camera segment, and the self-unload states.
//! - **`correlation`** – The bounded table that maps in-flight read tokens
//!   back to their destination buffers.

pub mod correlation;
pub mod stage;
