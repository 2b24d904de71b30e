//! `taxlawyer` crate (library surface).
//!
//! The primary entrypoint for end users is the `taxlawyer` binary. This library
//! exposes the terminal host pieces it is built from and re-exports the core
//! and network crates so embedders do not depend on the internal layout.

pub use taxlawyer_core as core;
pub use taxlawyer_local as local;

pub mod host;
