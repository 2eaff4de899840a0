pub mod central;
pub mod controller;
pub mod health;
pub mod link;
pub mod protocol;
pub mod reader;
pub mod sim;
pub mod store;
pub mod types;

pub use controller::*;
pub use types::*;
