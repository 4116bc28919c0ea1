//! Drydock core types
//!
//! Domain entities and DTOs shared between the orchestration engine
//! and the HTTP surface. This crate stays free of I/O so both sides
//! can depend on it without pulling in the runtime stack.

pub mod domain;
pub mod dto;
