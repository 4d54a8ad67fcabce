//! Socket server: listener lifecycle and per-connection handling.

pub mod connection;
pub mod listener;

pub use connection::{handle_connection, Closed, ConnectionContext};
pub use listener::{remove_socket_file, MetricsListener, SocketOwner};
