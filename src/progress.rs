use tracing::info;

/// Receives coarse progress while a terrain generates, one step per
/// pipeline stage. Editors hook a progress bar up to this; headless callers
/// can log or ignore it.
pub trait ProgressSink {
    fn begin(&mut self, total_steps: u32);
    fn step(&mut self, label: &str);
}

/// Logs each stage through `tracing`.
#[derive(Debug, Default)]
pub struct LogProgress {
    total: u32,
    current: u32,
}

impl ProgressSink for LogProgress {
    fn begin(&mut self, total_steps: u32) {
        self.total = total_steps;
        self.current = 0;
    }

    fn step(&mut self, label: &str) {
        self.current += 1;
        info!("terrain generation [{}/{}]: {}", self.current, self.total, label);
    }
}

/// Swallows all progress.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn begin(&mut self, _total_steps: u32) {}
    fn step(&mut self, _label: &str) {}
}
