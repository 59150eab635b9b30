// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Hail Auth Gateway - JWT verification and provider token brokering
//!
//! Verifies Auth0-issued bearer tokens against a rotating JWKS and resolves
//! each user's third-party provider access token through the identity
//! provider's management API, caching the result in a shared store.
//!
//! ## Modules
//!
//! - `api` - HTTP routes (Axum) and OpenAPI docs
//! - `auth` - Key resolution, token verification, provider token brokering
//! - `config` - Environment configuration
//! - `state` - Shared application state

pub mod api;
pub mod auth;
pub mod config;
pub mod state;
