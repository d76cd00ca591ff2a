//! Common orchestration abstractions for the VNET daemon.
//!
//! This crate provides the machinery every orchestration module is built
//! on:
//!
//! - [`Orch`]: base trait for orchestration agents driven by the daemon loop
//! - [`Consumer`]: batched, deduplicating delivery of keyed table changes
//! - [`Request`]/[`RequestDescription`]: schema-checked typed parsing of one
//!   change event
//! - [`TaskStatus`]/[`TaskError`]: the outcome taxonomy for processing one
//!   event (applied, deferred, dropped)
//!
//! # Architecture
//!
//! Configuration flows as batches of keyed SET/DEL events. Each orch owns
//! one consumer per table it subscribes to; the daemon calls `do_task()`
//! when a consumer has pending entries. An event is processed to a terminal
//! outcome on every pass: applied, rejected (logged and dropped), or
//! deferred back onto the consumer for the next pass when a cross-table
//! dependency is not ready yet.

mod consumer;
mod orch;
mod request;
mod task;

pub use consumer::{Consumer, ConsumerConfig, FieldValues, KeyOpFieldsValues, Operation};
pub use orch::Orch;
pub use request::{FieldKind, FieldValue, Request, RequestDescription, RequestError};
pub use task::{TaskError, TaskResult, TaskStatus};
