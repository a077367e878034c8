// Encoding engine: probing, inventory, planning and supervision

pub mod core;
pub mod hardware;
pub mod probe;
pub mod reporter;
pub mod worker;

pub use core::*;
pub use reporter::{ChannelReporter, NullReporter, ProgressEvent, ProgressReporter};
pub use worker::{EncodeHandle, EncodeRequest, Supervisor, SupervisorConfig};
