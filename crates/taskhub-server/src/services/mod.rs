pub mod group;
pub mod message;
pub mod task;
pub mod user;
