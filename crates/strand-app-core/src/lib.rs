// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Application services for Strand hosts: config storage port and session preferences.
#![forbid(unsafe_code)]

pub mod config;
pub mod prefs;
