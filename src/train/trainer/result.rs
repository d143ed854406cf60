//! Training result types

/// What one [`fit`](super::Trainer::fit) run produced
#[derive(Debug, Clone)]
pub struct FitSummary {
    /// Epochs that ran to completion
    pub epochs_run: usize,
    /// Mean training loss of the last finished epoch
    pub final_loss: f32,
    /// Best monitored loss achieved
    pub best_loss: f32,
    /// Whether a callback stopped training before the epoch budget
    pub stopped_early: bool,
    /// Out-of-memory recoveries that happened during the run
    pub oom_events: u32,
    /// Batch size the run finished with; lower than configured after
    /// out-of-memory recoveries
    pub final_batch_size: usize,
    /// Total training time in seconds
    pub elapsed_secs: f64,
}
