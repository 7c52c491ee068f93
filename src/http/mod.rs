//! HTTP protocol implementation.
//!
//! This module implements the HTTP/1.1 subset the file server speaks, with
//! keep-alive connections.
//!
//! # Architecture
//!
//! - **`connection`**: Drives one socket through the state machine
//! - **`state`**: The connection states and the pure transition function
//! - **`parser`**: Resumable request parser over a growing byte buffer
//! - **`request`**: HTTP request representation
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes responses and resumes partial writes
//! - **`mime`**: Content type detection based on file extensions
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │    Idle     │ ← Wait for the next request (idle timeout applies)
//!        └──────┬──────┘
//!               │ bytes
//!               ▼
//!   ParsingRequestLine → ParsingHeaders → ReadingBody
//!               │ request complete            │ parse error
//!               ▼                             ▼
//!        ┌──────────────────┐         ┌──────────────┐
//!        │   Dispatching    │         │   Rejected   │
//!        └──────┬───────────┘         └──────┬───────┘
//!               │ response                   │ error response
//!               ▼                            ▼
//!        ┌──────────────────┐
//!        │ WritingResponse  │
//!        └──────┬───────────┘
//!               │ flushed
//!               ├─ Keep-Alive → Idle (or straight to the next pipelined request)
//!               └─ Close → Closed
//! ```

pub mod connection;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod state;
pub mod writer;
