//! HTTP request handlers.

pub mod common;
pub mod files;
pub mod health;
pub mod storage;
pub mod uploads;

pub use files::*;
pub use health::*;
pub use storage::*;
pub use uploads::*;
