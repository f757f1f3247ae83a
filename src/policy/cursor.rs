//! Traversal cursor shared by the success and failure control paths.

/// Direction in which bindings are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Index `0..N-1`; used for requests.
    Forward,
    /// Index `N-1..0`; used for responses.
    Reverse,
}

/// Position in an ordered binding list.
///
/// One cursor per chain instance. `apply` and `apply_failure` both advance
/// it, so a failure resumes right after the policy that raised it rather than
/// restarting from the first binding.
#[derive(Debug, Clone)]
pub struct Cursor {
    order: Order,
    len: usize,
    position: usize,
}

impl Cursor {
    pub fn new(order: Order, len: usize) -> Self {
        Self {
            order,
            len,
            position: 0,
        }
    }

    /// Number of bindings already handed out.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.len - self.position
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.len
    }
}

impl Iterator for Cursor {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.is_exhausted() {
            return None;
        }
        let index = match self.order {
            Order::Forward => self.position,
            Order::Reverse => self.len - 1 - self.position,
        };
        self.position += 1;
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}
