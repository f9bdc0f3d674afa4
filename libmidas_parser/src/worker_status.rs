/// Progress message sent by a worker to whoever displays progress
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    /// File name of the input being decoded
    pub input: String,
    pub worker_id: usize,
}

impl WorkerStatus {
    pub fn new(progress: f32, input: &str, worker_id: usize) -> Self {
        Self {
            progress,
            input: input.to_string(),
            worker_id,
        }
    }
}
