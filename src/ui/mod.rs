//! Terminal rendering of output records.

pub mod renderer;

pub use renderer::Renderer;
