//! `hdmf_zarr` is a Rust storage backend that serializes hierarchical
//! scientific-data builder trees onto a Zarr-compatible chunked array store.
//!
//! The backend translates between an in-memory [`builder`] tree of groups,
//! datasets, attributes, links, and object references, and a directory of
//! chunked arrays plus JSON metadata, in both directions. Links and object
//! references, which Zarr has no native type for, are emulated with reserved
//! attributes (`zarr_link`, `zarr_dtype`) and resolved lazily on read.
//!
//! ## Getting started
//! ```rust
//! use hdmf_zarr::builder::{
//!     BuilderArena, DatasetBuilder, ElementData, GroupBuilder, Value,
//! };
//! use hdmf_zarr::data_type::DataType;
//! use hdmf_zarr::io::{ZarrIO, ZarrIOOptions};
//! use hdmf_zarr::spec_cache::TypeMap;
//! use hdmf_zarr::store::ZarrStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Build a tree: a root group holding one 2x2 int32 dataset.
//! let mut arena = BuilderArena::new();
//! let root = arena.insert_group(GroupBuilder::new(""));
//! let d1 = arena.insert_dataset(DatasetBuilder::new(
//!     "d1",
//!     DataType::Int32,
//!     Value::Array {
//!         data: ElementData::Int32(vec![1, 2, 3, 4]),
//!         shape: vec![2, 2],
//!     },
//! ));
//! match arena.get_mut(root) {
//!     hdmf_zarr::builder::Builder::Group(group) => {
//!         group.datasets.insert("d1".to_string(), d1);
//!     }
//!     _ => unreachable!(),
//! }
//!
//! // Write it to an in-memory store and read it back.
//! let store = ZarrStore::open_memory("mem://example");
//! let io = ZarrIO::open(store, TypeMap::new(), ZarrIOOptions::new());
//! io.write(&mut arena, root)?;
//! let (tree, root) = io.read()?;
//! assert!(tree.group(root).unwrap().datasets.contains_key("d1"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Stores
//! The [`store::ZarrStore`] abstraction covers a flat directory, a nested
//! directory, an in-memory map, an auto-deleting temporary directory, and a
//! read-only HTTP location; see [`hdmf_zarr_storage`] for the byte-level
//! traits and implementations.
//!
//! ## Logging
//! `hdmf_zarr` logs warnings (object-id mismatches, schema-cache and
//! consolidation failures) and diagnostics using the [`log`] crate.
//! A logging implementation must be enabled to capture them.
//!
//! ## Licence
//! `hdmf_zarr` is licensed under either of
//! - the Apache License, Version 2.0 or
//! - the MIT license, at your option.

pub mod attribute;
pub mod builder;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod data_type;
pub mod error;
pub mod export;
pub mod io;
pub mod link;
pub mod metadata;
pub mod node;
pub mod object_codec;
pub mod spec_cache;
pub mod store;

pub use hdmf_zarr_storage as storage;

pub use error::ZarrError;
