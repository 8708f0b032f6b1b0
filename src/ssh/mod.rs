pub mod channel;
pub mod client;
pub mod connector;

pub use channel::{ShellChannel, ShellEvent};
pub use client::SshClient;
pub use connector::{connect, ConnectedShell, ConnectorSettings, Dialer, ShellTransport, SshDialer};
