pub mod cli;
pub mod dry_run;
pub mod load_config;
pub mod logging;
pub mod telegram;

pub use cli::{run, Cli, Commands};
