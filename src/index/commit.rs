use serde::{Deserialize, Serialize};

/// When buffered writes become visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitPolicy {
    /// Commit after every buffered operation
    EveryDocument,
    /// Commit once this many operations are buffered
    EveryN(usize),
    /// Commit only when the context is explicitly committed
    Manual,
}

/// Applies a [`CommitPolicy`] to one unit of work.
///
/// The index keeps a template executor; every context gets its own clone,
/// bound to the index it writes for.
#[derive(Debug, Clone)]
pub struct CommitPolicyExecutor {
    policy: CommitPolicy,
    index_name: Option<String>,
    pending: usize,
    commits: usize,
}

impl CommitPolicyExecutor {
    pub fn new(policy: CommitPolicy) -> Self {
        Self {
            policy,
            index_name: None,
            pending: 0,
            commits: 0,
        }
    }

    /// Attach to an index and start counting from zero
    pub fn bind(&mut self, index_name: &str) {
        self.index_name = Some(index_name.to_string());
        self.reset();
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index_name.as_deref()
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    /// Record buffered operations; returns true when the context should commit now
    pub fn record(&mut self, operations: usize) -> bool {
        self.pending += operations;
        match self.policy {
            CommitPolicy::EveryDocument => self.pending > 0,
            CommitPolicy::EveryN(n) => self.pending >= n.max(1),
            CommitPolicy::Manual => false,
        }
    }

    pub fn committed(&mut self) {
        self.pending = 0;
        self.commits += 1;
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Forget buffered operations without counting a commit
    pub fn reset(&mut self) {
        self.pending = 0;
        self.commits = 0;
    }
}

impl Default for CommitPolicyExecutor {
    fn default() -> Self {
        Self::new(CommitPolicy::Manual)
    }
}
