//! The machine under test, as the executor sees it.

use crate::error::MemFault;

/// Result of one syscall on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallOutcome {
    /// Raw return value; `-1` means failure.
    pub res: i64,
    /// Errno accompanying a failed call; meaningless otherwise.
    pub errno: i32,
}

impl SyscallOutcome {
    /// A successful call returning `res`.
    pub const fn ok(res: i64) -> Self {
        Self { res, errno: 0 }
    }

    /// A failed call with the given errno.
    pub const fn err(errno: i32) -> Self {
        Self { res: -1, errno }
    }

    /// Whether the call failed.
    pub const fn failed(&self) -> bool {
        self.res == -1
    }
}

/// Target callbacks the executor drives syscalls and memory through.
///
/// Memory access is guarded: the data region a program addresses may be
/// partially unmapped, and the contract is that such accesses return
/// [`MemFault`] instead of crashing the executor. Syscall execution and
/// coverage collection are keyed by worker index because coverage devices
/// are typically bound per-thread.
pub trait Target: Send + Sync + 'static {
    /// Page size of the data region.
    fn page_size(&self) -> u64;

    /// Virtual address where the data region is mapped.
    fn data_offset(&self) -> u64;

    /// Number of entries in the syscall table; call numbers must stay
    /// below this.
    fn syscall_count(&self) -> usize;

    /// Runs one syscall on behalf of `worker`.
    fn execute_syscall(&self, worker: usize, num: u64, args: &[u64]) -> SyscallOutcome;

    /// Writes `bytes` at the target address, faulting on unmapped memory.
    fn mem_write(&self, addr: u64, bytes: &[u8]) -> Result<(), MemFault>;

    /// Reads `buf.len()` bytes from the target address, faulting on
    /// unmapped memory.
    fn mem_read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemFault>;

    /// Arms coverage collection for a worker. Called once per worker,
    /// before its first call.
    fn cover_enable(&self, worker: usize, collect_comps: bool);

    /// Discards coverage accumulated so far for a worker.
    fn cover_reset(&self, worker: usize);

    /// Appends the coverage entries collected since the last reset.
    fn cover_collect(&self, worker: usize, buf: &mut Vec<u64>);

    /// Arms fault injection for the `nth` fault site of the next call.
    fn inject_fault(&self, nth: u64);

    /// Whether the armed fault actually fired.
    fn fault_injected(&self) -> bool;
}

#[cfg(any(test, feature = "test-helpers"))]
pub use test_target::TestTarget;

#[cfg(any(test, feature = "test-helpers"))]
mod test_target {
    use super::{SyscallOutcome, Target};
    use crate::error::MemFault;
    use harrier_wire::MAX_THREADS;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    type SyscallHandler = dyn Fn(u64, &[u64]) -> SyscallOutcome + Send + Sync;

    /// In-process stand-in for a real target.
    ///
    /// Memory is a flat buffer mapped at `data_offset`; accesses outside
    /// it fault, which is exactly the guarded-access contract. Syscalls
    /// are routed to a programmable handler, coverage traces are scripted
    /// per call.
    pub struct TestTarget {
        page_size: u64,
        data_offset: u64,
        syscall_count: usize,
        mem: Mutex<Vec<u8>>,
        handler: Mutex<Box<SyscallHandler>>,
        calls: Mutex<Vec<(u64, Vec<u64>)>>,
        cover_enables: Mutex<Vec<(usize, bool)>>,
        cover_script: Mutex<VecDeque<Vec<u64>>>,
        pending_cover: Mutex<[Vec<u64>; MAX_THREADS]>,
        fault_armed: AtomicBool,
    }

    impl TestTarget {
        /// A target with `pages` data pages and 64 syscall slots.
        pub fn new(pages: usize) -> Self {
            Self {
                page_size: 4096,
                data_offset: 0x1_0000,
                syscall_count: 64,
                mem: Mutex::new(vec![0; pages * 4096]),
                handler: Mutex::new(Box::new(|_, _| SyscallOutcome::ok(0))),
                calls: Mutex::new(Vec::new()),
                cover_enables: Mutex::new(Vec::new()),
                cover_script: Mutex::new(VecDeque::new()),
                pending_cover: Mutex::new(Default::default()),
                fault_armed: AtomicBool::new(false),
            }
        }

        /// Replaces the syscall handler.
        pub fn set_handler(
            &self,
            f: impl Fn(u64, &[u64]) -> SyscallOutcome + Send + Sync + 'static,
        ) {
            *self.handler.lock().expect("poisoned") = Box::new(f);
        }

        /// Queues a coverage trace; each executed call consumes one.
        pub fn push_cover(&self, trace: Vec<u64>) {
            self.cover_script.lock().expect("poisoned").push_back(trace);
        }

        /// Every syscall executed so far, in completion order.
        pub fn calls(&self) -> Vec<(u64, Vec<u64>)> {
            self.calls.lock().expect("poisoned").clone()
        }

        /// Every `cover_enable` call so far, as `(worker, collect_comps)`.
        pub fn cover_enables(&self) -> Vec<(usize, bool)> {
            self.cover_enables.lock().expect("poisoned").clone()
        }

        /// Reads back target memory for assertions.
        pub fn mem_snapshot(&self, addr: u64, len: usize) -> Vec<u8> {
            let mut buf = vec![0; len];
            self.mem_read(addr, &mut buf).expect("address in range");
            buf
        }

        fn range(&self, addr: u64, len: usize) -> Result<usize, MemFault> {
            let fault = MemFault { addr, len };
            let start = addr.checked_sub(self.data_offset).ok_or(fault)? as usize;
            let end = start.checked_add(len).ok_or(fault)?;
            if end > self.mem.lock().expect("poisoned").len() {
                return Err(fault);
            }
            Ok(start)
        }
    }

    impl Target for TestTarget {
        fn page_size(&self) -> u64 {
            self.page_size
        }

        fn data_offset(&self) -> u64 {
            self.data_offset
        }

        fn syscall_count(&self) -> usize {
            self.syscall_count
        }

        fn execute_syscall(&self, _worker: usize, num: u64, args: &[u64]) -> SyscallOutcome {
            self.calls
                .lock()
                .expect("poisoned")
                .push((num, args.to_vec()));
            let handler = self.handler.lock().expect("poisoned");
            (*handler)(num, args)
        }

        fn mem_write(&self, addr: u64, bytes: &[u8]) -> Result<(), MemFault> {
            let start = self.range(addr, bytes.len())?;
            self.mem.lock().expect("poisoned")[start..start + bytes.len()]
                .copy_from_slice(bytes);
            Ok(())
        }

        fn mem_read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemFault> {
            let start = self.range(addr, buf.len())?;
            buf.copy_from_slice(&self.mem.lock().expect("poisoned")[start..start + buf.len()]);
            Ok(())
        }

        fn cover_enable(&self, worker: usize, collect_comps: bool) {
            self.cover_enables
                .lock()
                .expect("poisoned")
                .push((worker, collect_comps));
        }

        fn cover_reset(&self, worker: usize) {
            let next = self
                .cover_script
                .lock()
                .expect("poisoned")
                .pop_front()
                .unwrap_or_default();
            self.pending_cover.lock().expect("poisoned")[worker] = next;
        }

        fn cover_collect(&self, worker: usize, buf: &mut Vec<u64>) {
            buf.extend(std::mem::take(
                &mut self.pending_cover.lock().expect("poisoned")[worker],
            ));
        }

        fn inject_fault(&self, _nth: u64) {
            self.fault_armed.store(true, Ordering::SeqCst);
        }

        fn fault_injected(&self) -> bool {
            self.fault_armed.swap(false, Ordering::SeqCst)
        }
    }
}
