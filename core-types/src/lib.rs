// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared record types, slot addressing, identifiers, and configuration for
//! the stream rollup system.

pub mod config;
pub mod level;
pub mod types;
pub mod uid;
