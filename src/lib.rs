// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

pub mod auth;
pub mod client;
pub mod config;
pub mod proxy;
pub mod stream;
pub mod upstream;
