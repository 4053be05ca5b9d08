//! Stack - Thread stack allocation
//!
//! Each thread gets a separately allocated, zero-filled kernel stack. With an
//! owned allocation the stack cannot silently run into the control block the
//! way a co-allocated TCB-plus-stack page can, so the canary (kept in the
//! TCB) only guards against stray writes through raw pointers in the
//! platform layer.

use alloc::vec::Vec;

use super::super::core::error::{SchedulerError, SchedulerResult};

/// Default kernel stack size (16KB)
pub const DEFAULT_KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Thread stack
pub struct Stack {
    /// Backing storage; base is the lowest address, top the initial SP
    buffer: Vec<u8>,
}

impl Stack {
    /// Allocate a new zero-filled stack.
    pub fn new(size: usize) -> SchedulerResult<Self> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| SchedulerError::StackAllocationFailed { size })?;
        buffer.resize(size, 0);
        Ok(Self { buffer })
    }

    /// Stack base address (lowest)
    pub fn base(&self) -> usize {
        self.buffer.as_ptr() as usize
    }

    /// Stack top address (initial stack pointer; stacks grow downward)
    pub fn top(&self) -> usize {
        self.base() + self.buffer.len()
    }

    /// Stack size in bytes
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Check if an address falls within this stack
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.top()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_layout() {
        let stack = Stack::new(4096).unwrap();
        assert_eq!(stack.size(), 4096);
        assert_eq!(stack.top() - stack.base(), 4096);
        assert!(stack.contains(stack.base()));
        assert!(stack.contains(stack.top() - 1));
        assert!(!stack.contains(stack.top()));
    }
}
