//! Core subprocess execution components.
//!
//! - **record**: Output records and run outcomes
//! - **ansi**: SGR escape decoding into styled runs
//! - **buffer**: Bounded, thread-safe record history
//! - **lines**: Incremental UTF-8 decoding and line assembly
//! - **command**: Command templates and tokenizing
//! - **session**: One child process with merged output and stdin
//!
//! # Architecture
//!
//! ```text
//! ProcessSession
//! ├── Child (stdout + stderr on one pipe, stdin writer)
//! └── Reader thread
//!     ├── Utf8Decoder
//!     └── LineAssembler ─► SessionSink
//! ```

pub mod ansi;
pub mod buffer;
pub mod command;
pub mod lines;
pub mod record;
pub mod session;
