pub mod counter_json;

pub use counter_json::{CounterJsonError, parse_counter_tree};
