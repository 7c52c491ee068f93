//! Request routing and the GET/POST/DELETE handlers.

pub mod handlers;
pub mod router;

pub use router::{Route, Router};
