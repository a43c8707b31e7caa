pub mod catalog;
pub mod host;
pub mod network;
pub mod subnet;
