pub mod app;
pub mod cli;
pub mod daemon;
pub mod logging;
pub mod signal;

pub use app::App;
pub use cli::{Cli, Command};
pub use signal::{ShutdownSignal, SignalHandler};
