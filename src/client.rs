//! Execution core: one client, two physical execution paths.
//!
//! The same call expression works in blocking code (`.wait()`) and inside a
//! tokio runtime (`.await`). Both paths share request building, response
//! parsing, the retry policy and the cache; only the reqwest client and the
//! way the caller waits differ.

pub mod builder;
pub mod call;
pub mod core;
pub mod request;
pub mod stream;

pub use crate::session::ExecutionMode;
pub use builder::ClientBuilder;
pub use call::{Call, Dispatched};
pub use core::Client;
pub use request::{ApiRequest, ApiResponse, REQUEST_ID_HEADER};
pub use stream::LineIter;
