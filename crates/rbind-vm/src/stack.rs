//! Stack growth for the recursive parser and evaluator.
//!
//! Script recursion is bounded by [`VmOptions::max_call_depth`] and source
//! nesting by the parser's own limit, but a single script call spans many
//! host frames. Both recursive paths run through [`ensure_sufficient_stack`]
//! so those limits are reached before the host thread's stack is.
//!
//! [`VmOptions::max_call_depth`]: crate::VmOptions::max_call_depth

/// Grow when less than this much stack remains.
const RED_ZONE: usize = 128 * 1024;

/// Size of each newly allocated stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(n: u32) -> u32 {
        ensure_sufficient_stack(|| {
            let pad = std::hint::black_box([0u8; 512]);
            if n == 0 { u32::from(pad[0]) } else { 1 + depth(n - 1) }
        })
    }

    #[test]
    fn deep_recursion_grows_the_stack() {
        assert_eq!(depth(20_000), 20_000);
    }
}
