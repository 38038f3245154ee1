//! API request handlers

mod artifacts;
mod cycles;
mod events;
mod health;
mod prompts;
mod servers;

pub use artifacts::*;
pub use cycles::*;
pub use events::*;
pub use health::*;
pub use prompts::*;
pub use servers::*;
