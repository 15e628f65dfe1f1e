//! `${...}` template expansion for task configuration strings.

mod expander;
mod json_path;

pub use expander::{expand, Encoding, Expander};
pub use json_path::lookup;
