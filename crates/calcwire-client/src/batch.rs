//! Concurrent load runs.
//!
//! A batch generates one expression per connection from a single seed, sends
//! them from a bounded pool of scoped worker threads and checks every reply
//! against the local evaluator. Connections beyond the pool size queue up and
//! are picked by whichever worker finishes first.

use std::{
    io,
    net::SocketAddr,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{
    client::{Client, ClientConfig, Reply},
    error::ClientError,
    generator::{ExpressionGenerator, Fragmentation},
};

/// Accepted distance between a reply and the local result, relative for
/// magnitudes above one.
pub const TOLERANCE: f64 = 1e-6;

/// Default number of worker threads in a batch.
pub const DEFAULT_WORKERS: usize = 64;

/// Batch configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Connections, one request each
    pub connections: usize,
    /// Worker threads sending requests; at most this many connections are
    /// open at once
    pub workers: usize,
    /// Operands per expression
    pub operands: usize,
    /// How each request is cut into writes
    pub fragmentation: Fragmentation,
    /// Seed for expressions and fragment boundaries
    pub seed: u64,
    /// Spaces around operators
    pub spaced: bool,
    /// Per-connection client settings
    pub client: ClientConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            connections: 1,
            workers: DEFAULT_WORKERS,
            operands: 5,
            fragmentation: Fragmentation::default(),
            seed: 0,
            spaced: false,
            client: ClientConfig::default(),
        }
    }
}

/// Result of one session in a batch.
#[derive(Debug)]
pub enum Outcome {
    /// Reply agreed with the local evaluator
    Match,
    /// Reply disagreed with the local evaluator
    Mismatch {
        /// Local result; `None` means `ERROR` was expected
        expected: Option<f64>,
        /// What the server sent
        reply: Reply,
    },
    /// The session did not complete
    Failed(ClientError),
}

/// One session of a batch.
#[derive(Debug)]
pub struct SessionReport {
    /// Request text
    pub expression: String,
    /// Number of writes the request was split into
    pub fragments: usize,
    /// Result
    pub outcome: Outcome,
}

/// Results of [`run_batch`], in connection order.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Per-session reports
    pub sessions: Vec<SessionReport>,
}

impl BatchReport {
    /// Sessions whose reply matched.
    pub fn matched(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Match))
    }

    /// Sessions whose reply did not match.
    pub fn mismatched(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Mismatch { .. }))
    }

    /// Sessions that failed with an I/O or protocol error.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    /// Every session matched.
    pub fn is_success(&self) -> bool {
        self.sessions.iter().all(|s| matches!(s.outcome, Outcome::Match))
    }

    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.sessions.iter().filter(|s| predicate(&s.outcome)).count()
    }
}

/// Whether `actual` is within [`TOLERANCE`] of `expected`.
pub fn within_tolerance(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() <= TOLERANCE * expected.abs().max(1.0)
}

/// Result the server is expected to send for `expression`.
///
/// `None` means `ERROR`: evaluation fails or the value is not finite.
pub fn expected_value(expression: &str) -> Option<f64> {
    calcwire_core::evaluate(expression).ok().filter(|value| value.is_finite())
}

/// Whether `reply` is the correct answer given the local result.
pub fn reply_matches(reply: &Reply, expected: Option<f64>) -> bool {
    match (reply, expected) {
        (Reply::Value(actual), Some(expected)) => within_tolerance(*actual, expected),
        (Reply::Error, None) => true,
        _ => false,
    }
}

struct Plan {
    expression: String,
    fragments: Vec<Vec<u8>>,
    expected: Option<f64>,
}

/// Run `config.connections` sessions against `address`, at most
/// `config.workers` at a time.
///
/// A worker thread that cannot be spawned shrinks the pool. If no worker can
/// be spawned at all, every session fails with [`ClientError::Spawn`].
pub fn run_batch(address: SocketAddr, config: &BatchConfig) -> BatchReport {
    let mut generator = ExpressionGenerator::new(config.seed).spaced(config.spaced);
    // Separate stream so the expressions for a seed do not depend on the
    // fragmentation strategy.
    let mut cuts = ChaCha8Rng::seed_from_u64(config.seed);
    cuts.set_stream(1);

    let plans: Vec<Plan> = (0..config.connections)
        .map(|_| {
            let expression = generator.generate(config.operands);
            let fragments = config.fragmentation.split(expression.as_bytes(), &mut cuts);
            let expected = expected_value(&expression);
            Plan { expression, fragments, expected }
        })
        .collect();

    let client = Client::new(address, config.client.clone());
    let workers = config.workers.clamp(1, plans.len().max(1));
    let (slots, spawn_error) = run_workers(&client, &plans, workers);
    let outcomes = settle(slots, spawn_error.as_ref());

    let sessions = plans
        .into_iter()
        .zip(outcomes)
        .map(|(plan, outcome)| SessionReport {
            expression: plan.expression,
            fragments: plan.fragments.len(),
            outcome,
        })
        .collect();

    let report = BatchReport { sessions };
    tracing::info!(
        connections = config.connections,
        workers,
        matched = report.matched(),
        mismatched = report.mismatched(),
        failed = report.failed(),
        "batch finished"
    );
    report
}

/// Execute `plans` on up to `workers` scoped threads.
///
/// Returns one slot per plan, `None` where no worker finished that plan, and
/// the spawn error if the pool could not be filled.
fn run_workers(
    client: &Client,
    plans: &[Plan],
    workers: usize,
) -> (Vec<Option<Outcome>>, Option<io::Error>) {
    let next = AtomicUsize::new(0);
    let next = &next;
    let mut slots: Vec<Option<Outcome>> = plans.iter().map(|_| None).collect();
    let mut spawn_error = None;

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let spawned = thread::Builder::new()
                .name(format!("calcwire-batch-{id}"))
                .spawn_scoped(scope, move || work(client, plans, next));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::warn!(spawned = handles.len(), "failed to spawn batch worker: {}", e);
                    spawn_error = Some(e);
                    break;
                },
            }
        }

        for handle in handles {
            // A panicked worker leaves its current plan's slot empty.
            if let Ok(done) = handle.join() {
                for (index, outcome) in done {
                    slots[index] = Some(outcome);
                }
            }
        }
    });

    (slots, spawn_error)
}

/// Claim plans until none are left.
fn work(client: &Client, plans: &[Plan], next: &AtomicUsize) -> Vec<(usize, Outcome)> {
    let mut done = Vec::new();

    loop {
        let index = next.fetch_add(1, Ordering::Relaxed);
        let Some(plan) = plans.get(index) else {
            return done;
        };
        done.push((index, execute(client, plan)));
    }
}

/// Fill slots no worker finished.
///
/// Every slot is empty only when no worker ran, so those sessions report the
/// spawn error. Otherwise an empty slot belongs to a worker that panicked.
fn settle(slots: Vec<Option<Outcome>>, spawn_error: Option<&io::Error>) -> Vec<Outcome> {
    let none_ran = slots.iter().all(Option::is_none);

    slots
        .into_iter()
        .map(|slot| match (slot, spawn_error) {
            (Some(outcome), _) => outcome,
            (None, Some(e)) if none_ran => {
                Outcome::Failed(ClientError::Spawn(io::Error::new(e.kind(), e.to_string())))
            },
            (None, _) => Outcome::Failed(ClientError::WorkerPanicked),
        })
        .collect()
}

fn execute(client: &Client, plan: &Plan) -> Outcome {
    match client.send(&plan.fragments) {
        Ok(reply) if reply_matches(&reply, plan.expected) => {
            tracing::debug!(expression = %plan.expression, ?reply, "reply matched");
            Outcome::Match
        },
        Ok(reply) => {
            tracing::warn!(
                expression = %plan.expression,
                expected = ?plan.expected,
                ?reply,
                "reply mismatch"
            );
            Outcome::Mismatch { expected: plan.expected, reply }
        },
        Err(e) => {
            tracing::warn!(expression = %plan.expression, "session failed: {}", e);
            Outcome::Failed(e)
        },
    }
}
