use tokio::sync::mpsc;

/// A boxed unit of work posted across a thread boundary to be run on its
/// owner's runloop. This is the only sanctioned way to mutate state owned
/// by another engine/connection/extension thread — generalizes the
/// teacher's fixed `ReactorCommand` enum into "post an arbitrary closure".
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// One owner's single-consumer task queue. `post_task_tail` enqueues work
/// to run after everything already queued; the owner's run loop drains the
/// channel and executes tasks in order on its own thread, so task bodies
/// never need their own synchronization.
#[derive(Clone)]
pub struct RunloopHandle {
    tx: mpsc::UnboundedSender<Task>,
}

impl RunloopHandle {
    /// Enqueues `task` to run on the owning runloop, tail of the queue.
    /// Returns `Err` if the owner has already shut down.
    pub fn post_task_tail<F>(&self, task: F) -> Result<(), RunloopClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(task)).map_err(|_| RunloopClosed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("runloop has shut down")]
pub struct RunloopClosed;

/// Owns the receiving half. Whoever runs the owner's thread calls
/// `run_until_closed` (or drains manually with `try_recv`/`recv` inside a
/// `tokio::select!` alongside other event sources, as `Connection` does).
pub struct Runloop {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl Runloop {
    pub fn new() -> (RunloopHandle, Runloop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RunloopHandle { tx }, Runloop { rx })
    }

    /// Pulls the next queued task without blocking, for use inside a
    /// `tokio::select!` arm alongside socket/channel reads.
    pub async fn recv(&mut self) -> Option<Task> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Task> {
        self.rx.try_recv().ok()
    }

    /// Drains and runs every queued task until the last handle is dropped.
    /// Used by simple owners (tests, `ten-host`'s demo extensions) that
    /// have no other event source to interleave with.
    pub async fn run_until_closed(mut self) {
        while let Some(task) = self.recv().await {
            task();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn tasks_run_in_post_order() {
        let (handle, rl) = Runloop::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            handle.post_task_tail(move || order.lock().unwrap().push(i)).unwrap();
        }
        drop(handle);
        rl.run_until_closed().await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn post_after_close_errors() {
        let (handle, rl) = Runloop::new();
        drop(rl);
        let counter = Arc::new(AtomicU32::new(0));
        let counter2 = counter.clone();
        let result = handle.post_task_tail(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        assert!(result.is_err());
    }
}
