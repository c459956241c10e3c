//! Subcommands

mod list;
mod replay;
mod show;

pub use list::ListCommand;
pub use replay::ReplayCommand;
pub use show::ShowCommand;
