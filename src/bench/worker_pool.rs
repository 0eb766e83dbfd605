use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::error;


/// A bounded executor shared by all protocol listeners: at most `num_workers` submitted tasks
///  make progress at a time, the rest queue up behind the semaphore. Submission is
///  fire-and-forget - the pool gives fairness of concurrent connection handling, never
///  ordering. There is no shutdown: tasks must be self-terminating.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> WorkerPool {
        WorkerPool {
            permits: Arc::new(Semaphore::new(num_workers.max(1))),
        }
    }

    pub fn submit(&self, task: impl Future<Output = ()> + Send + 'static) {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => task.await,
                Err(_) => error!("worker pool semaphore was closed"),
            }
        });
    }
}
