//! Calcwire client.
//!
//! Load generator for the calcwire server. Produces seeded random
//! expressions, splits them into fragments, sends each over its own
//! connection and checks the replies against the local evaluator from
//! [`calcwire_core`].
//!
//! # Components
//!
//! - [`ExpressionGenerator`]: seeded random expressions
//! - [`Fragmentation`]: how a request is cut into writes
//! - [`Client`]: one blocking request/reply exchange per call
//! - [`run_batch`]: many exchanges over a bounded worker pool with a summary [`BatchReport`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod client;
mod error;
mod generator;

pub use batch::{
    BatchConfig, BatchReport, DEFAULT_WORKERS, Outcome, SessionReport, TOLERANCE, expected_value,
    reply_matches, run_batch, within_tolerance,
};
pub use client::{Client, ClientConfig, Reply};
pub use error::ClientError;
pub use generator::{
    DEFAULT_MAX_CHUNK, ExpressionGenerator, Fragmentation, MAX_OPERAND, MIN_OPERAND, OPERATORS,
};
