pub mod group;
pub mod message;
pub mod task;
pub mod user;

pub use group::*;
pub use message::*;
pub use task::*;
pub use user::*;
