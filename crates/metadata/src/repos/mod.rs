//! Repository traits for metadata operations.

pub mod accounts;
pub mod files;
pub mod finalize;

pub use accounts::AccountRepo;
pub use files::FileRepo;
pub use finalize::FinalizeRepo;
