// src/stream/mod.rs
//
// Frame acquisition: sources, the reconnect supervisor and link-state history.

pub mod connectivity;
pub mod source;
pub mod supervisor;

pub use connectivity::{ConnectivityStore, ConnectivityTracker};
pub use source::{FileSource, FrameSource};
pub use supervisor::{FrameConsumer, RtspConnector, StreamSupervisor};
