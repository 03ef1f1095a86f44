pub mod business;
pub mod fleet;
pub mod host;
