//! Open handles: random 64-bit ids inserted into a node's `threads` map on
//! open, removed on close (§4.6 handle reference counting).

use rand::Rng;

/// A live reference to an open node. Dropping a handle does not itself
/// close it; callers must call the owning tree's `close_*` method (this
/// mirrors the teacher's explicit-close pattern rather than an RAII guard,
/// since `close` may need to propagate an error from the underlying store).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

impl Handle {
    /// Mint a fresh handle id (§4.6: "a fresh handle with a random 64-bit
    /// id").
    pub fn new() -> Self {
        Handle(rand::thread_rng().gen::<u64>())
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}
