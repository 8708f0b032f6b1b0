pub mod registry;
pub mod relay;

pub use registry::{Session, SessionRegistry, ShellInput};
pub use relay::{run_relay, RelaySettings};
