//! # Process Poller
//!
//! Launches child processes and reports their exit codes from one background
//! loop.
//!
//! ## Overview
//!
//! Children are kept in a mutex-protected list. The loop sleeps on a
//! work-available signal while the list is empty; otherwise it polls every
//! child's exit status at a fixed interval. Each exited child is removed under
//! the lock and its callback runs afterwards, outside the lock, exactly once.
//! A panicking callback is caught and logged so the loop survives it.

use parking_lot::Mutex;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Invoked with the exit code, `-1` when the process died from a signal
pub type ExitCallback = Box<dyn FnOnce(i32) + Send + 'static>;

struct WatchedProcess {
    pid: Option<u32>,
    child: Child,
    on_exit: ExitCallback,
}

/// Shared poller; clone the `Arc` to hand it around
pub struct ProcessPoller {
    processes: Mutex<Vec<WatchedProcess>>,
    work_available: Notify,
    poll_interval: Duration,
    poll_loop: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProcessPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessPoller")
            .field("watched", &self.watched())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl ProcessPoller {
    pub fn new(poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            processes: Mutex::new(Vec::new()),
            work_available: Notify::new(),
            poll_interval,
            poll_loop: Mutex::new(None),
        })
    }

    /// Start the background loop if it is not running. Must be called from
    /// within a tokio runtime.
    pub fn init(self: &Arc<Self>) {
        let mut poll_loop = self.poll_loop.lock();
        if poll_loop.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let poller = Arc::clone(self);
        *poll_loop = Some(tokio::spawn(async move { poller.run_loop().await }));
        debug!(poll_interval_ms = self.poll_interval.as_millis() as u64, "Process poller started");
    }

    /// Spawn `args[0]` with the remaining arguments and watch it.
    ///
    /// Returns the OS process id when the platform reports one.
    pub fn launch(self: &Arc<Self>, args: &[String], on_exit: ExitCallback) -> io::Result<Option<u32>> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        let child = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .spawn()?;
        let pid = child.id();

        self.processes.lock().push(WatchedProcess {
            pid,
            child,
            on_exit,
        });
        self.init();
        self.work_available.notify_one();

        debug!(pid = ?pid, program = %program, "Launched process");
        Ok(pid)
    }

    /// Number of processes not yet reaped
    pub fn watched(&self) -> usize {
        self.processes.lock().len()
    }

    /// Stop the background loop. Watched children keep running unobserved.
    pub fn shutdown(&self) {
        if let Some(handle) = self.poll_loop.lock().take() {
            handle.abort();
            info!(unreaped = self.watched(), "Process poller stopped");
        }
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            if self.processes.lock().is_empty() {
                // notify_one stores a permit, so a launch racing this check still wakes us
                self.work_available.notified().await;
                continue;
            }

            for (pid, exit_code, on_exit) in self.reap_exited() {
                debug!(pid = ?pid, exit_code, "Process exited");
                if catch_unwind(AssertUnwindSafe(move || on_exit(exit_code))).is_err() {
                    error!(pid = ?pid, exit_code, "❌ Process exit callback panicked");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn reap_exited(&self) -> Vec<(Option<u32>, i32, ExitCallback)> {
        let mut processes = self.processes.lock();
        let mut exited = Vec::new();
        let mut index = 0;

        while index < processes.len() {
            match processes[index].child.try_wait() {
                Ok(Some(status)) => {
                    let process = processes.remove(index);
                    exited.push((process.pid, status.code().unwrap_or(-1), process.on_exit));
                }
                Ok(None) => index += 1,
                Err(err) => {
                    let process = processes.remove(index);
                    warn!(pid = ?process.pid, error = %err, "Cannot read process status, reporting as failed");
                    exited.push((process.pid, -1, process.on_exit));
                }
            }
        }
        exited
    }
}
