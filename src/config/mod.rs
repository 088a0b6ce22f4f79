//! Configuration helpers shared by the CLI commands.

mod duration;
mod entities;

pub use duration::{parse_duration, parse_duration_to_secs};
pub use entities::{parse_entities_toml, resolve_entities};
