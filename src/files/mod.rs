//! Filesystem access.
//!
//! - **`resolver`**: pure mapping of a request path onto a base directory
//! - **`gateway`**: reads, uploads and deletes, after resolution succeeded

pub mod gateway;
pub mod resolver;

pub use gateway::{FileGateway, StaticFile};
pub use resolver::{Rejection, ResolvedPath, resolve};
