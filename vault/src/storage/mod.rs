//! Persistence of sealed blobs.

mod backend;
mod fragment;

pub use backend::{Backend, BackendError, BackendStats, DirBackend, MemoryBackend};
pub use fragment::{FragmentError, FragmentFiles};
