pub mod fixtures;
pub mod transport;
