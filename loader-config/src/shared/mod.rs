mod base;
mod batch;
mod connection;
mod loader;
mod replayer;
mod retry;

pub use base::*;
pub use batch::*;
pub use connection::*;
pub use loader::*;
pub use replayer::*;
pub use retry::*;
