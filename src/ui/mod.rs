//! Display sinks.
//!
//! - **renderer**: `ConsoleSink`, styled output on the host terminal
//! - **log**: `SegmentLog`, an in-memory record of emitted segments (tests)

#[cfg(test)]
pub mod log;
pub mod renderer;

#[cfg(test)]
pub use log::SegmentLog;
pub use renderer::ConsoleSink;
