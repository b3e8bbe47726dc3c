//! Parser guards against runaway loops and unbounded recursion

use crate::parser::error::ParseError;
use crate::parser::token::Span;

/// Maximum iterations for any parser loop
const MAX_LOOP_ITERATIONS: usize = 100_000;

/// Maximum nesting depth before rejecting parse
///
/// Deeply nested blocks and parentheses recurse through the whole
/// expression grammar, so this stays well below what overflows a test
/// thread's stack in debug builds.
pub const MAX_PARSE_DEPTH: usize = 64;

/// Guard against loops that stop consuming tokens.
///
/// ```ignore
/// let mut guard = LoopGuard::new("statements");
/// while !done {
///     guard.check(span)?;
///     // ... parse something ...
/// }
/// ```
pub struct LoopGuard {
    name: &'static str,
    count: usize,
    max: usize,
}

impl LoopGuard {
    /// Create a new loop guard with default limit
    #[inline]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            count: 0,
            max: MAX_LOOP_ITERATIONS,
        }
    }

    /// Count one iteration, failing once the limit is exceeded
    #[inline]
    pub fn check(&mut self, span: Span) -> Result<(), ParseError> {
        self.count += 1;
        if self.count > self.max {
            return Err(ParseError::parser_limit_exceeded(
                format!("loop '{}' exceeded {} iterations", self.name, self.max),
                span,
            ));
        }
        Ok(())
    }
}

/// Recursion depth tracker; the parser calls `enter` on the way down and
/// `leave` on the way back up.
#[derive(Debug, Default)]
pub struct DepthCounter {
    depth: usize,
}

impl DepthCounter {
    /// Descend one level.
    #[inline]
    pub fn enter(&mut self, name: &'static str, span: Span) -> Result<(), ParseError> {
        if self.depth >= MAX_PARSE_DEPTH {
            return Err(ParseError::parser_limit_exceeded(
                format!("maximum nesting depth ({}) exceeded in {}", MAX_PARSE_DEPTH, name),
                span,
            ));
        }
        self.depth += 1;
        Ok(())
    }

    /// Return one level.
    #[inline]
    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Current depth
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_guard_trips() {
        let mut guard = LoopGuard::new("test");
        for _ in 0..MAX_LOOP_ITERATIONS {
            assert!(guard.check(Span::default()).is_ok());
        }
        assert!(guard.check(Span::default()).is_err());
    }

    #[test]
    fn test_depth_counter() {
        let mut depth = DepthCounter::default();
        for _ in 0..MAX_PARSE_DEPTH {
            depth.enter("test", Span::default()).unwrap();
        }
        assert!(depth.enter("test", Span::default()).is_err());
        depth.leave();
        assert_eq!(depth.depth(), MAX_PARSE_DEPTH - 1);
    }
}
