//! Worker threads for multithreaded sessions
//!
//! The fuser session loop reads requests on one thread. In multithreaded
//! mode each request body is queued here so a slow backend call only holds
//! up its own request. Plain OS threads are used because the async
//! dispatcher blocks on its own runtime, which is not allowed from inside
//! another runtime's threads.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{trace, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub const DEFAULT_WORKERS: usize = 8;

/// Fixed pool of request workers. Dropping the pool finishes queued jobs.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let threads = (0..size.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("fuse-worker-{}", i))
                    .spawn(move || loop {
                        let job = receiver.lock().recv();
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        trace!("started {} fuse worker(s)", threads.len());
        Ok(Self {
            sender: Some(sender),
            threads,
        })
    }

    /// Queue a job. Runs it inline if the pool is shutting down.
    pub fn execute<F: FnOnce() + Send + 'static>(&self, job: F) {
        match &self.sender {
            Some(sender) => {
                if let Err(mpsc::SendError(job)) = sender.send(Box::new(job)) {
                    job();
                }
            }
            None => job(),
        }
    }

    pub fn size(&self) -> usize {
        self.threads.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("fuse worker exited with a panic");
            }
        }
    }
}
