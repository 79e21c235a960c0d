//! Counter-ratio flamegraph engine.
//!
//! ```text
//!   JSON tree ─▶ ProfileTree ─▶ derive ─▶ calibrate ─▶ ColorPolicy ─▶ FlameLayout::paint ─▶ RenderCommand[]
//!                                  ▲                        ▲
//!                           file / metric              threshold
//! ```
//!
//! [`viewer::Viewer`] ties the stages to the three user selections and keeps
//! the shareable state string in sync.

pub mod calibrate;
pub mod color;
pub mod config;
pub mod derive;
pub mod export;
pub mod model;
pub mod parsers;
pub mod source;
pub mod state;
pub mod svg;
pub mod viewer;
pub mod views;

pub use config::ViewerConfig;
pub use state::ViewState;
pub use viewer::{LoadOutcome, Recompute, Transition, Viewer};
