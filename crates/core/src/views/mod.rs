pub mod flame;

pub use flame::{FlameLayout, LaidOutFrame};
