//! Device abstraction layer
//!
//! Provides the narrow device interface the frame graph consumes, the handle and
//! descriptor types shared with backends, and a dummy backend for tests.

pub mod dummy;
pub mod traits;
pub mod types;

pub use dummy::{DeviceCall, DummyDevice};
pub use traits::*;
pub use types::*;
