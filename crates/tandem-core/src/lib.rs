//! Core types and trait definitions for Tandem, the two-party declaration
//! store.
//!
//! An employer (or its representative) and an employee each file one half of
//! a cross-border-work declaration. This crate holds the record and
//! submission model, the linking engine that pairs the halves, and the
//! processor that drives each submitted half through its downstream sinks.
//!
//! Storage lives behind [`store::DeclarationStore`]; no backend is linked here.

// Trait methods spell out `Send` futures; impls use plain `async fn`.
#![allow(async_fn_in_trait)]

pub mod actor;
pub mod error;
pub mod linking;
pub mod processor;
pub mod record;
pub mod sink;
pub mod store;
pub mod submission;
pub mod submit;

pub use error::{Error, Result};
