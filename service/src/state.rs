//! Scheduler state definitions.

/// Refresh scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Created, loop not started.
    Idle,
    /// Waiting for the next tick.
    Waiting,
    /// A refresh pass is in flight.
    Refreshing,
    /// Shutdown requested; the loop exits at the next cycle boundary.
    ShuttingDown,
    /// Loop has exited.
    Stopped,
}
