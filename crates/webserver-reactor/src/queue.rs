use std::thread;

use crossbeam_channel::Sender;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A named, serial, FIFO executor of closures backed by one dedicated
/// worker thread.
///
/// This is the "dispatch queue" the reactor schedules callbacks onto when
/// a watch entry names a `target_queue`. It is intentionally minimal: no
/// work-stealing, no priorities, no bounded backpressure. Cloning a queue
/// is cheap (it clones the channel sender); the worker thread keeps
/// running until every clone of the sender has been dropped, at which
/// point its channel disconnects and the loop ends on its own.
#[derive(Clone)]
pub struct DispatchQueue {
    name: &'static str,
    sender: Sender<Job>,
}

impl DispatchQueue {
    /// Spawns the worker thread and returns a handle to it.
    pub fn named(name: &'static str) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in receiver {
                    job();
                }
                tracing::debug!(queue = name, "dispatch queue worker exiting");
            })
            .expect("failed to spawn dispatch queue worker thread");

        Self { name, sender }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Schedules `job` to run asynchronously on this queue's worker.
    /// Jobs run strictly in the order they were scheduled.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) {
        if self.sender.send(Box::new(job)).is_err() {
            tracing::warn!(queue = self.name, "dispatch queue worker is gone, dropping job");
        }
    }
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn runs_jobs_in_order() {
        let queue = DispatchQueue::named("test-order");
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..50 {
            let order = Arc::clone(&order);
            queue.schedule(move || order.lock().unwrap().push(i));
        }

        // Schedule a final job and spin until it lands, so the prior 50
        // are guaranteed to have run before we inspect the vec (FIFO).
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        queue.schedule(move || done_tx.send(()).unwrap());
        done_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();

        let order = order.lock().unwrap();
        let expected: Vec<usize> = (0..50).collect();
        assert_eq!(*order, expected);
    }

    #[test]
    fn clone_shares_the_same_worker() {
        let queue = DispatchQueue::named("test-clone");
        let other = queue.clone();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count);
        queue.schedule(move || {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&count);
        other.schedule(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        queue.schedule(move || done_tx.send(()).unwrap());
        done_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
