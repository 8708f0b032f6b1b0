pub mod builder;

pub use builder::CommandBuilder;
