//! runpane - run scripts in a child process and stream their output
//!
//! A script is written to a scratch file, run through a per-language
//! command template, and its merged output is delivered line by line as
//! `OutputRecord`s. Lines can be sent back to the child's stdin while it
//! runs.

pub mod config;
pub mod controller;
pub mod core;
pub mod language;
pub mod scratch;
pub mod ui;
