pub mod compose;
pub mod connection;
pub mod error;
pub mod event;
