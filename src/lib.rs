//! Upload books to a Calibre-Web server that only offers an HTML form login.
//!
//! [`client::SessionAuthenticator`] turns credentials into a session (cookies
//! plus an upload-scoped anti-forgery token), [`client::UploadSubmitter`] posts
//! one book with it, and [`client::UploadCycle`] chains the two. [`batch`] runs
//! one independent cycle per file.

pub mod batch;
pub mod client;
pub mod config;
pub mod errors;
pub mod security;

pub use errors::{AppError, AppResult, ErrorKind, Step};
