//! # basaltpass-core
//!
//! Core types for the BasaltPass control plane: the domain model, the
//! error taxonomy, configuration options, the typed [`store::Store`]
//! abstraction, and the trait interfaces for external collaborators
//! (audit sink, passkey/TOTP verifiers, message delivery).
//!
//! This crate contains no I/O of its own. Services live in `basaltpass`,
//! storage backends implement [`store::Store`], and the HTTP surface is
//! provided by `basaltpass-axum`.

pub mod audit;
pub mod collab;
pub mod error;
pub mod id;
pub mod model;
pub mod options;
pub mod store;

pub use error::{ApiError, BasaltError, ErrorCode, Result};
