//! Worker pool primitives.
//!
//! Each worker owns one [`WorkerShared`] cell and coordinates with the
//! scheduler through a strict two-event handshake: the coordinator fills
//! the job and sets `ready`; the worker clears `ready`, runs the call and
//! sets `done`; the coordinator clears `done` on the next dispatch. The
//! job mutex is therefore only ever contended by one side at a time — the
//! worker between `ready` and `done`, the coordinator otherwise.

use crate::target::Target;
use harrier_wire::{COVER_SIZE, MAX_ARGS};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Resettable boolean event.
#[derive(Debug, Default)]
pub(crate) struct Event {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub(crate) fn set(&self) {
        *self.flag.lock().expect("poisoned") = true;
        self.cond.notify_all();
    }

    pub(crate) fn reset(&self) {
        *self.flag.lock().expect("poisoned") = false;
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.flag.lock().expect("poisoned")
    }

    pub(crate) fn wait(&self) {
        let mut flag = self.flag.lock().expect("poisoned");
        while !*flag {
            flag = self.cond.wait(flag).expect("poisoned");
        }
    }

    /// Waits until the event is set or `timeout` elapses; reports whether
    /// it was set.
    pub(crate) fn timed_wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock().expect("poisoned");
        while !*flag {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(flag, deadline - now)
                .expect("poisoned");
            flag = guard;
        }
        true
    }
}

/// Work order and result cell of one worker.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) shutdown: bool,
    pub(crate) call_num: u64,
    pub(crate) num_args: usize,
    pub(crate) args: [u64; MAX_ARGS],
    pub(crate) inject_fault: bool,
    pub(crate) fault_nth: u64,
    pub(crate) collect_cover: bool,
    pub(crate) res: i64,
    pub(crate) errno: i32,
    pub(crate) fault_injected: bool,
    pub(crate) cover: Vec<u64>,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            shutdown: false,
            call_num: 0,
            num_args: 0,
            args: [0; MAX_ARGS],
            inject_fault: false,
            fault_nth: 0,
            collect_cover: false,
            res: -1,
            errno: 0,
            fault_injected: false,
            cover: Vec::new(),
        }
    }
}

/// State shared between the coordinator and one worker thread.
#[derive(Debug, Default)]
pub(crate) struct WorkerShared {
    pub(crate) ready: Event,
    pub(crate) done: Event,
    pub(crate) job: Mutex<Job>,
}

/// One pool slot: the shared cell plus coordinator-side bookkeeping.
/// Only the coordinator touches the fields below `shared`.
#[derive(Debug)]
pub(crate) struct Worker {
    pub(crate) shared: Arc<WorkerShared>,
    pub(crate) spawned: bool,
    /// Trace mode the worker's coverage device is armed for;
    /// `Some(true)` is comparison mode, `None` is never armed.
    pub(crate) cover_mode: Option<bool>,
    /// No undrained completion is pending.
    pub(crate) handled: bool,
    pub(crate) call_index: u64,
    pub(crate) call_num: u64,
    pub(crate) copyout_index: u64,
    /// Stream position of the call's trailing copyout instructions.
    pub(crate) copyout_pos: usize,
}

impl Worker {
    /// A fresh, idle slot. `done` starts set so the scheduler can pick
    /// the slot without a completed call behind it.
    pub(crate) fn new() -> Self {
        let shared = Arc::new(WorkerShared::default());
        shared.done.set();
        Self {
            shared,
            spawned: false,
            cover_mode: None,
            handled: true,
            call_index: 0,
            call_num: 0,
            copyout_index: 0,
            copyout_pos: 0,
        }
    }
}

/// Body of a worker thread.
pub(crate) fn worker_loop<T: Target>(target: Arc<T>, shared: Arc<WorkerShared>, index: usize) {
    loop {
        shared.ready.wait();
        shared.ready.reset();
        {
            let mut job = shared.job.lock().expect("poisoned");
            if job.shutdown {
                return;
            }
            run_call(&*target, index, &mut job);
        }
        shared.done.set();
    }
}

/// Runs one call on behalf of worker `index`, filling the job's result
/// fields. Shared between worker threads and the synchronous path.
pub(crate) fn run_call<T: Target>(target: &T, index: usize, job: &mut Job) {
    if job.collect_cover {
        target.cover_reset(index);
    }
    if job.inject_fault {
        target.inject_fault(job.fault_nth);
    }
    let outcome = target.execute_syscall(index, job.call_num, &job.args[..job.num_args]);
    job.res = outcome.res;
    job.errno = outcome.errno;
    job.fault_injected = job.inject_fault && target.fault_injected();
    job.cover.clear();
    if job.collect_cover {
        target.cover_collect(index, &mut job.cover);
        job.cover.truncate(COVER_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn event_handshake_roundtrip() {
        let ev = Arc::new(Event::default());
        assert!(!ev.is_set());
        assert!(!ev.timed_wait(Duration::from_millis(1)));

        let ev2 = ev.clone();
        let t = thread::spawn(move || {
            ev2.wait();
            ev2.reset();
        });
        ev.set();
        t.join().unwrap();
        assert!(!ev.is_set());
    }

    #[test]
    fn timed_wait_observes_a_concurrent_set() {
        let ev = Arc::new(Event::default());
        let ev2 = ev.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            ev2.set();
        });
        assert!(ev.timed_wait(Duration::from_secs(5)));
        t.join().unwrap();
    }
}
