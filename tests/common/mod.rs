//! Shared test fixtures (used by functional, integration, unit and proptest suites).

#![allow(dead_code)]

pub mod fixtures;
