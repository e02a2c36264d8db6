//! Core types and trait definitions for the OMI zone/quotation dataset.
//!
//! This crate is deliberately free of file-format and database
//! dependencies. The codec crates, the store, and the ingest pipeline all
//! depend on it.

// Native `async fn` in traits; the store trait spells out its `Send` bounds.
#![allow(async_fn_in_trait)]

pub mod batch;
pub mod error;
pub mod key;
pub mod quotation;
pub mod resolver;
pub mod semester;
pub mod store;
pub mod zone;

pub use error::{Error, Result};
pub use key::JoinKey;
pub use semester::Semester;
