//! Error types for the calcwire core.
//!
//! Two layers: evaluation errors (the expression itself is bad) and session
//! errors (the state machine was driven out of order). Evaluation errors never
//! reach the transport; a session turns every one of them into the `ERROR`
//! sentinel response.

use thiserror::Error;

use crate::session::Phase;

/// Errors produced while evaluating an expression.
///
/// Every variant carries the byte offset into the input at which the problem
/// was detected. All of them are terminal for the evaluation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalError {
    /// A number was required but no digit run starts here
    #[error("number expected at offset {position}")]
    NumberExpected {
        /// Offset of the offending byte (or input length at end of input)
        position: usize,
    },

    /// An opened group has no matching close, or a close has no opener
    #[error("unbalanced parenthesis at offset {position}")]
    UnbalancedParen {
        /// Offset where the missing or stray parenthesis was detected
        position: usize,
    },

    /// Right-hand operand of `/` evaluated to zero
    #[error("division by zero at offset {position}")]
    DivisionByZero {
        /// Offset of the `/` operator
        position: usize,
    },

    /// Input continues after a complete top-level expression
    #[error("trailing input at offset {position}")]
    TrailingInput {
        /// Offset of the first unconsumed byte
        position: usize,
    },

    /// Parenthesis nesting exceeds the evaluator's depth limit
    #[error("nesting deeper than {limit} groups at offset {position}")]
    NestingTooDeep {
        /// Maximum supported nesting depth
        limit: usize,
        /// Offset of the `(` that crossed the limit
        position: usize,
    },
}

impl EvalError {
    /// Byte offset at which the error was detected.
    pub fn position(&self) -> usize {
        match *self {
            Self::NumberExpected { position }
            | Self::UnbalancedParen { position }
            | Self::DivisionByZero { position }
            | Self::TrailingInput { position }
            | Self::NestingTooDeep { position, .. } => position,
        }
    }
}

/// Errors from driving a [`Session`](crate::session::Session) in the wrong
/// phase.
///
/// The event loop only dispatches readiness that matches the current phase,
/// so these indicate a driver bug rather than a misbehaving peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation is not valid in the session's current phase
    #[error("invalid phase: cannot {operation} while {phase:?}")]
    InvalidPhase {
        /// Phase the session was in
        phase: Phase,
        /// Operation that was attempted
        operation: &'static str,
    },
}
