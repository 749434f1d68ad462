//! Command-line surface: parse one of `init | rebuild-cache | pick-next |
//! track-start | vacuum` and route it to the matching component.

mod commands;

pub use commands::{run_command, Cli, Commands};
