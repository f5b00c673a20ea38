use tokio::task::JoinHandle;

/// Handle to a callback listener running on the tokio runtime.
///
/// Delivery stops when the handle is cancelled or dropped. Keep the handle
/// alive for as long as the callback should run.
#[derive(Debug)]
#[must_use = "dropping the handle stops the listener"]
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Stops delivery.
    pub fn cancel(self) {
        self.task.abort();
    }

    /// Returns true once the listener has stopped for any reason.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
