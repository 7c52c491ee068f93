//! filedrop - a small HTTP/1.1 file server
//!
//! Serves files from a root directory, stores uploads in a storage
//! directory and deletes files on request.

pub mod config;
pub mod context;
pub mod error;
pub mod files;
pub mod http;
pub mod server;
pub mod service;
