#![warn(
    rust_2024_compatibility,
    clippy::all,
    clippy::future_not_send,
    clippy::mod_module_files,
    clippy::needless_pass_by_ref_mut,
    clippy::unused_async
)]

pub mod config;
pub mod error;
pub mod meta;
pub mod proxy;
pub mod registry;
pub mod rewrite;
pub mod tarball;
pub mod upstream;

pub use error::{Error, Result};
