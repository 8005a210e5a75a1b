//! Wire types shared between the Taskhub server and its clients.

pub mod events;
pub mod types;

pub use events::*;
pub use types::*;
