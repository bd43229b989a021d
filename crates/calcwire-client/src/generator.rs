//! Random request generation.
//!
//! Expressions are flat chains of integers in `1..=100` joined by the four
//! operators, so a divisor is never zero. Requests are then cut into
//! fragments that the client writes one at a time.

use rand::{Rng, SeedableRng, seq::index};
use rand_chacha::ChaCha8Rng;

/// Smallest generated operand.
pub const MIN_OPERAND: u32 = 1;

/// Largest generated operand.
pub const MAX_OPERAND: u32 = 100;

/// Operators drawn uniformly.
pub const OPERATORS: [char; 4] = ['+', '-', '*', '/'];

/// Default upper bound for [`Fragmentation::MaxChunk`].
pub const DEFAULT_MAX_CHUNK: usize = 10;

/// Seeded generator of arithmetic expressions.
///
/// The same seed always yields the same sequence of expressions.
#[derive(Debug, Clone)]
pub struct ExpressionGenerator {
    rng: ChaCha8Rng,
    spaced: bool,
}

impl ExpressionGenerator {
    /// Create a generator from `seed`.
    pub fn new(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed), spaced: false }
    }

    /// Put a space on each side of every operator.
    #[must_use]
    pub fn spaced(mut self, spaced: bool) -> Self {
        self.spaced = spaced;
        self
    }

    /// Generate an expression with `operands` operands (at least one).
    pub fn generate(&mut self, operands: usize) -> String {
        let mut text = self.operand().to_string();

        for _ in 1..operands.max(1) {
            let op = OPERATORS[self.rng.gen_range(0..OPERATORS.len())];
            if self.spaced {
                text.push(' ');
                text.push(op);
                text.push(' ');
            } else {
                text.push(op);
            }
            text.push_str(&self.operand().to_string());
        }

        text
    }

    fn operand(&mut self) -> u32 {
        self.rng.gen_range(MIN_OPERAND..=MAX_OPERAND)
    }
}

/// How a request is cut into writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragmentation {
    /// One write with the whole request
    Whole,
    /// Exactly `n` non-empty pieces (fewer if the request is shorter)
    Count(usize),
    /// Random pieces of `1..=n` bytes each
    MaxChunk(usize),
}

impl Default for Fragmentation {
    fn default() -> Self {
        Self::MaxChunk(DEFAULT_MAX_CHUNK)
    }
}

impl Fragmentation {
    /// Cut `request` into non-empty fragments that concatenate back to it.
    ///
    /// An empty request yields no fragments. Counts and chunk sizes of zero
    /// are treated as one.
    pub fn split<R>(&self, request: &[u8], rng: &mut R) -> Vec<Vec<u8>>
    where
        R: Rng + ?Sized,
    {
        if request.is_empty() {
            return Vec::new();
        }

        match *self {
            Self::Whole => vec![request.to_vec()],
            Self::Count(n) => split_count(request, n.clamp(1, request.len()), rng),
            Self::MaxChunk(n) => split_max_chunk(request, n.max(1), rng),
        }
    }
}

fn split_count<R>(request: &[u8], pieces: usize, rng: &mut R) -> Vec<Vec<u8>>
where
    R: Rng + ?Sized,
{
    // Distinct cut points in 1..len.
    let mut cuts: Vec<usize> =
        index::sample(rng, request.len() - 1, pieces - 1).into_iter().map(|i| i + 1).collect();
    cuts.sort_unstable();

    let mut fragments = Vec::with_capacity(pieces);
    let mut start = 0;
    for cut in cuts {
        fragments.push(request[start..cut].to_vec());
        start = cut;
    }
    fragments.push(request[start..].to_vec());
    fragments
}

fn split_max_chunk<R>(request: &[u8], max_chunk: usize, rng: &mut R) -> Vec<Vec<u8>>
where
    R: Rng + ?Sized,
{
    let mut fragments = Vec::new();
    let mut rest = request;

    while !rest.is_empty() {
        let len = rng.gen_range(1..=max_chunk.min(rest.len()));
        let (head, tail) = rest.split_at(len);
        fragments.push(head.to_vec());
        rest = tail;
    }

    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operands(text: &str) -> Vec<u32> {
        text.split(|c: char| OPERATORS.contains(&c))
            .map(|s| s.trim().parse().unwrap())
            .collect()
    }

    #[test]
    fn same_seed_same_expressions() {
        let mut a = ExpressionGenerator::new(7);
        let mut b = ExpressionGenerator::new(7);

        for _ in 0..10 {
            assert_eq!(a.generate(6), b.generate(6));
        }
    }

    #[test]
    fn operand_count_and_range() {
        let mut generator = ExpressionGenerator::new(1);

        for count in 1..20 {
            let text = generator.generate(count);
            let values = operands(&text);
            assert_eq!(values.len(), count, "{text}");
            assert!(values.iter().all(|v| (MIN_OPERAND..=MAX_OPERAND).contains(v)), "{text}");
        }
    }

    #[test]
    fn zero_operands_still_yields_expression() {
        let text = ExpressionGenerator::new(3).generate(0);
        assert_eq!(operands(&text).len(), 1);
    }

    #[test]
    fn spaced_expressions_surround_operators() {
        let text = ExpressionGenerator::new(9).spaced(true).generate(4);

        assert_eq!(text.matches(' ').count(), 6, "{text}");
        assert!(calcwire_core::evaluate(&text).is_ok());
    }

    #[test]
    fn generated_expressions_evaluate() {
        let mut generator = ExpressionGenerator::new(11);

        for _ in 0..100 {
            let text = generator.generate(8);
            assert!(calcwire_core::evaluate(&text).is_ok(), "{text}");
        }
    }

    #[test]
    fn whole_is_single_fragment() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(Fragmentation::Whole.split(b"1+2", &mut rng), vec![b"1+2".to_vec()]);
    }

    #[test]
    fn count_splits_exactly() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let fragments = Fragmentation::Count(4).split(b"10+5", &mut rng);

        assert_eq!(fragments, vec![b"1".to_vec(), b"0".to_vec(), b"+".to_vec(), b"5".to_vec()]);
    }

    #[test]
    fn count_larger_than_request_is_capped() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(Fragmentation::Count(50).split(b"1+2", &mut rng).len(), 3);
        assert_eq!(Fragmentation::Count(0).split(b"1+2", &mut rng).len(), 1);
    }

    #[test]
    fn empty_request_has_no_fragments() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(Fragmentation::default().split(b"", &mut rng).is_empty());
        assert!(Fragmentation::Whole.split(b"", &mut rng).is_empty());
    }
}
