pub mod listener;
pub mod publisher;
