pub mod mocks;

#[allow(unused_imports)]
pub use mocks::{FailingReadBackend, MemoryBackend};
