//! Calcwire core logic.
//!
//! Pure state machines with no sockets and no multiplexer. The server crate
//! wraps these with real I/O.
//!
//! # Components
//!
//! - [`eval`]: recursive-descent evaluator for `+ - * /` and parentheses
//! - [`session`]: per-connection state machine (receive, evaluate, respond)
//! - [`error`]: evaluation and session error types
//!
//! Sessions follow the action pattern: readiness callbacks take a
//! `Read`/`Write` handle and return [`SessionAction`]s for the caller to
//! execute against its multiplexer. Tests drive them with scripted
//! transports instead of sockets.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod eval;
pub mod session;

pub use error::{EvalError, SessionError};
pub use eval::{MAX_NESTING_DEPTH, evaluate, evaluate_bytes};
pub use session::{
    CloseReason, ERROR_SENTINEL, Phase, Session, SessionAction, SessionConfig, render_response,
};
