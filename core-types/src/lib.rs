// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared schemas, enums, configuration, and retry policy for the billing
//! reconciliation workspace.

pub mod config;
pub mod retry;
pub mod types;
