//! Bounded loops
//!
//! Every traversal iterates through a [`BoundedLoop`]. Userspace and tests run
//! the body in a [`PlainLoop`]; the probe object drives it from a `bpf_loop`
//! callback, so the verifier checks one body instead of stepping through
//! every iteration.

use core::ops::ControlFlow;

pub trait BoundedLoop {
    /// Call `body` with `0..count` until it breaks
    fn run<F: FnMut(u32) -> ControlFlow<()>>(&self, count: u32, body: F);
}

/// An ordinary `for` loop
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlainLoop;

impl BoundedLoop for PlainLoop {
    fn run<F: FnMut(u32) -> ControlFlow<()>>(&self, count: u32, mut body: F) {
        for i in 0..count {
            if body(i).is_break() {
                break;
            }
        }
    }
}

impl<L: BoundedLoop> BoundedLoop for &L {
    fn run<F: FnMut(u32) -> ControlFlow<()>>(&self, count: u32, body: F) {
        (**self).run(count, body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_loop_stops_on_break() {
        let mut seen = Vec::new();
        PlainLoop.run(10, |i| {
            seen.push(i);
            if i == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_plain_loop_runs_count_times() {
        let mut calls = 0;
        PlainLoop.run(5, |_| {
            calls += 1;
            ControlFlow::Continue(())
        });
        assert_eq!(calls, 5);
    }
}
