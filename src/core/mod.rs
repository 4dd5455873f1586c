//! Core command session components.
//!
//! - **term**: ANSI escape sequence decoder and styled segments
//! - **cwd**: Working directory tracked by the session
//! - **process**: Child process with piped, threaded I/O
//! - **session**: State machine tying input, children and output together
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── WorkingDirectory (cd built-in)
//! ├── ChildProcess (at most one, stdin + output threads)
//! └── Decoder per output stream (bytes -> StyledSegment)
//! ```

pub mod cwd;
pub mod process;
pub mod session;
pub mod term;
