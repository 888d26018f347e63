//! Verification utilities for dof-wgpu
//!
//! This crate provides a CPU reference engine for the depth of field pass graph
//! and tools for checking the wgpu implementation against it.

pub mod compare;
pub mod reference_engine;
pub mod wgpu_helpers;
