// ABOUTME: Utility modules for common functionality across the application
// ABOUTME: Only the shared HTTP client survives here; OAuth/JWT helpers moved into routes.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod http_client;
