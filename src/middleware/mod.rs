// ABOUTME: HTTP middleware for request tracing and admin authorization
// ABOUTME: CORS and per-request tracing layers are built in lib.rs from tower_http directly
//
// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod admin_guard;

pub use admin_guard::require_admin;
