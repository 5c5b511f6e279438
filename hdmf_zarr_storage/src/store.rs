//! The concrete stores: [`MemoryStore`], [`FilesystemStore`], [`TempStore`], and [`HttpStore`].

mod filesystem;
mod http;
mod memory;
mod temp;

pub use filesystem::{FilesystemStore, FilesystemStoreCreateError};
pub use http::{HttpStore, HttpStoreCreateError};
pub use memory::MemoryStore;
pub use temp::{TempStore, TempStoreCreateError};
