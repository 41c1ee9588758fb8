// SPDX-License-Identifier: MPL-2.0

//! Client library for CodeKrafts, a network for sharing code snippets and memes.
//!
//! The hosted backend owns accounts, tables and files. This crate keeps a
//! session-scoped cache of what the client has seen, applies likes and
//! follows optimistically, joins per-table fetches into display records and
//! tracks post views in the background.

pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod gateway;
pub mod model;
pub mod notify;
pub mod runtime;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use app::{App, AppError};
