//! The executor: stream dispatch, call scheduling and completion.

use crate::{
    consts::{
        COMPLETION_TIMEOUT, COMPLETION_TIMEOUT_DEBUG, FINAL_DRAIN_BUDGET, GRACE_PERIOD,
        GRACE_PERIOD_FINAL,
    },
    cover::{comparisons, signals, DedupTable},
    csum::InetChecksum,
    error::ExecError,
    mem,
    output::OutputBuffer,
    pool::{run_call, worker_loop, Worker},
    target::Target,
};
use harrier_wire::{
    ArgKind, ChunkKind, CsumKind, EnvFlags, ExecFlags, Instr, Word, WordReader, DEFAULT_VALUE,
    EXEC_BUFFER_SIZE, INSTR_COPYOUT, INSTR_EOF, MAX_ARGS, MAX_COMMANDS, MAX_THREADS, NO_COPYOUT,
};
use std::sync::Arc;
use std::thread;
use std::time::Instant;


/// Per-request execution options, straight off the execute header.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOpts {
    /// Execution mode flags.
    pub flags: ExecFlags,
    /// Process slot of the fuzzer owning this request.
    pub pid: u64,
    /// Call index to inject a fault into.
    pub fault_call: u64,
    /// Fault site within that call.
    pub fault_nth: u64,
}

/// Summary of one executed program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    /// Calls that completed and were recorded.
    pub completed: u32,
    /// Bytes of output records produced.
    pub output_len: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct CallResult {
    executed: bool,
    val: Word,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    call_index: u64,
    num: Word,
    copyout_index: Word,
    num_args: usize,
    args: [u64; MAX_ARGS],
    /// Stream position just past the call instruction, where its
    /// trailing copyouts start.
    copyout_pos: usize,
}

/// Owns all execution state of one target process: the result table, the
/// signal dedup table, the worker pool and the output buffer.
///
/// State is process-lifetime — workers persist across programs — but
/// zeroed at the top of every [`Executor::execute_one`].
pub struct Executor<T: Target> {
    target: Arc<T>,
    env: EnvFlags,
    results: Vec<CallResult>,
    dedup: DedupTable,
    workers: Vec<Worker>,
    running: usize,
    collide: bool,
    output: OutputBuffer,
}

impl<T: Target> Executor<T> {
    /// An executor over `target` with the environment fixed by the
    /// handshake.
    pub fn new(target: Arc<T>, env: EnvFlags) -> Self {
        Self {
            target,
            env,
            results: vec![CallResult::default(); MAX_COMMANDS],
            dedup: DedupTable::new(),
            workers: (0..MAX_THREADS).map(|_| Worker::new()).collect(),
            running: 0,
            collide: false,
            output: OutputBuffer::new(),
        }
    }

    /// The output records of the last executed program.
    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    /// Runs one serialized program.
    ///
    /// Parses `input` top to bottom, servicing copyins inline and
    /// dispatching calls per the waiting policy. With the collide flag
    /// the whole program runs a second time without waiting on alternate
    /// calls; the replay emits no records but reuses the result table.
    #[tracing::instrument(name = "execute", skip_all, fields(pid = opts.pid, bytes = input.len()))]
    pub fn execute_one(&mut self, input: &[u8], opts: &ExecOpts) -> Result<ExecResult, ExecError> {
        if input.len() > EXEC_BUFFER_SIZE {
            return Err(ExecError::ProgTooLarge {
                size: input.len(),
                limit: EXEC_BUFFER_SIZE,
            });
        }
        self.reset();
        loop {
            self.run_pass(input, opts)?;
            let wants_collide = opts.flags.contains(ExecFlags::THREADED)
                && opts.flags.contains(ExecFlags::COLLIDE)
                && !opts.flags.contains(ExecFlags::INJECT_FAULT);
            if wants_collide && !self.collide {
                tracing::debug!("collide replay");
                self.collide = true;
                continue;
            }
            break;
        }
        Ok(ExecResult {
            completed: self.output.completed(),
            output_len: self.output.bytes().len(),
        })
    }

    /// Zeroes all per-program state. Completions of stragglers from a
    /// previous program are dropped, not misattributed.
    fn reset(&mut self) {
        self.results.fill(CallResult::default());
        self.dedup.clear();
        self.running = 0;
        self.collide = false;
        self.output.reset();
        for worker in &mut self.workers {
            worker.handled = true;
        }
    }

    fn run_pass(&mut self, input: &[u8], opts: &ExecOpts) -> Result<(), ExecError> {
        let mut reader = WordReader::new(input);
        let mut call_index: u64 = 0;
        loop {
            let word = reader.read_word()?;
            match Instr::decode(word) {
                Instr::Eof => break,
                Instr::Copyin => self.handle_copyin(&mut reader)?,
                // Serviced while draining the owning call's completion.
                Instr::Copyout => reader.skip_words(3)?,
                Instr::Call(num) => {
                    let pending = self.read_call(&mut reader, call_index, num)?;
                    tracing::trace!(call_index, num, "dispatch");
                    self.schedule_call(input, &reader, pending, opts)?;
                    call_index += 1;
                }
            }
        }
        self.final_drain(input, opts)
    }

    fn read_call(
        &mut self,
        reader: &mut WordReader<'_>,
        call_index: u64,
        num: Word,
    ) -> Result<Pending, ExecError> {
        let copyout_index = reader.read_word()?;
        if copyout_index != NO_COPYOUT && copyout_index >= MAX_COMMANDS as Word {
            return Err(ExecError::BadCopyoutIndex {
                index: copyout_index,
                limit: MAX_COMMANDS,
            });
        }
        let num_args = reader.read_word()?;
        if num_args > MAX_ARGS as Word {
            return Err(ExecError::TooManyArgs {
                count: num_args,
                limit: MAX_ARGS,
            });
        }
        let num_args = num_args as usize;
        let mut args = [0u64; MAX_ARGS];
        for slot in args.iter_mut().take(num_args) {
            *slot = self.read_call_arg(reader)?;
        }
        if num >= self.target.syscall_count() as Word {
            return Err(ExecError::BadCallNum {
                num,
                count: self.target.syscall_count(),
            });
        }
        Ok(Pending {
            call_index,
            num,
            copyout_index,
            num_args,
            args,
            copyout_pos: reader.pos(),
        })
    }

    /// Reads one call argument and resolves it to its runtime value.
    fn read_call_arg(&mut self, reader: &mut WordReader<'_>) -> Result<Word, ExecError> {
        let kind = ArgKind::try_from(reader.read_word()?)?;
        match kind {
            ArgKind::Const => {
                let _size = reader.read_word()?;
                let value = reader.read_word()?;
                // Bitfield slicing only applies to memory stores.
                reader.skip_words(2)?;
                Ok(value)
            }
            ArgKind::Result => {
                let _size = reader.read_word()?;
                let index = reader.read_word()?;
                let op_div = reader.read_word()?;
                let op_add = reader.read_word()?;
                if index >= MAX_COMMANDS as Word {
                    return Err(ExecError::BadCopyoutIndex {
                        index,
                        limit: MAX_COMMANDS,
                    });
                }
                Ok(self.resolve_result(index, op_div, op_add))
            }
            // Blobs and checksums never appear as direct call arguments.
            kind @ (ArgKind::Data | ArgKind::Csum) => Err(ExecError::BadCallArg { kind }),
        }
    }

    fn resolve_result(&self, index: Word, op_div: Word, op_add: Word) -> Word {
        let slot = self.results[index as usize];
        if !slot.executed {
            return DEFAULT_VALUE;
        }
        let mut val = slot.val;
        if op_div != 0 {
            val /= op_div;
        }
        val.wrapping_add(op_add)
    }

    fn handle_copyin(&mut self, reader: &mut WordReader<'_>) -> Result<(), ExecError> {
        let addr = reader.read_word()?;
        let kind = ArgKind::try_from(reader.read_word()?)?;
        match kind {
            ArgKind::Const => {
                let size = reader.read_word()?;
                let value = reader.read_word()?;
                let bf_off = reader.read_word()?;
                let bf_len = reader.read_word()?;
                mem::copyin_value(&*self.target, addr, value, size, bf_off, bf_len)
            }
            ArgKind::Result => {
                let size = reader.read_word()?;
                let index = reader.read_word()?;
                let op_div = reader.read_word()?;
                let op_add = reader.read_word()?;
                if index >= MAX_COMMANDS as Word {
                    return Err(ExecError::BadCopyoutIndex {
                        index,
                        limit: MAX_COMMANDS,
                    });
                }
                let value = self.resolve_result(index, op_div, op_add);
                mem::copyin_value(&*self.target, addr, value, size, 0, 0)
            }
            ArgKind::Data => {
                let len = reader.read_word()?;
                let bytes = reader.read_bytes(len as usize)?;
                mem::copyin_data(&*self.target, addr, bytes);
                Ok(())
            }
            ArgKind::Csum => self.handle_csum(reader, addr),
        }
    }

    fn handle_csum(&mut self, reader: &mut WordReader<'_>, addr: u64) -> Result<(), ExecError> {
        let size = reader.read_word()?;
        let CsumKind::Inet = CsumKind::try_from(reader.read_word()?)?;
        if size != 2 {
            return Err(ExecError::Decode(harrier_wire::Fault::BadOperandSize));
        }
        let n_chunks = reader.read_word()?;
        let mut csum = InetChecksum::new();
        for _ in 0..n_chunks {
            let kind = ChunkKind::try_from(reader.read_word()?)?;
            let value = reader.read_word()?;
            let chunk_size = reader.read_word()?;
            match kind {
                ChunkKind::Data => self.feed_target_bytes(value, chunk_size, &mut csum),
                ChunkKind::Const => match chunk_size {
                    2 => csum.update(&(value as u16).to_be_bytes()),
                    4 => csum.update(&(value as u32).to_be_bytes()),
                    8 => csum.update(&value.to_be_bytes()),
                    _ => {
                        return Err(ExecError::Decode(harrier_wire::Fault::BadOperandSize));
                    }
                },
            }
        }
        mem::copyin_value(&*self.target, addr, csum.digest().into(), 2, 0, 0)
    }

    /// Feeds target memory into the checksum, block by block so a hostile
    /// chunk size cannot force a giant allocation. A fault abandons the
    /// rest of the chunk, keeping whatever was already accumulated.
    fn feed_target_bytes(&self, mut addr: u64, mut len: u64, csum: &mut InetChecksum) {
        let mut block = [0u8; 4096];
        while len > 0 {
            let n = len.min(block.len() as u64) as usize;
            match self.target.mem_read(addr, &mut block[..n]) {
                Ok(()) => csum.update(&block[..n]),
                Err(fault) => {
                    tracing::trace!(%fault, "checksum chunk fault swallowed");
                    return;
                }
            }
            addr = addr.wrapping_add(n as u64);
            len -= n as u64;
        }
    }

    fn schedule_call(
        &mut self,
        input: &[u8],
        reader: &WordReader<'_>,
        pending: Pending,
        opts: &ExecOpts,
    ) -> Result<(), ExecError> {
        if opts.flags.contains(ExecFlags::INJECT_FAULT)
            && opts.flags.contains(ExecFlags::COLLIDE)
        {
            return Err(ExecError::CollideWithFault);
        }
        if !opts.flags.contains(ExecFlags::THREADED) {
            return self.execute_inline(input, pending, opts);
        }

        let mut picked = None;
        for index in 0..self.workers.len() {
            if !self.workers[index].spawned {
                self.spawn_worker(index);
            }
            if self.workers[index].shared.done.is_set() {
                if !self.workers[index].handled {
                    self.drain_completion(index, input, opts)?;
                }
                picked = Some(index);
                break;
            }
        }
        let Some(index) = picked else {
            return Err(ExecError::NoFreeWorkers);
        };

        self.maybe_enable_cover(index, opts);
        self.dispatch(index, &pending, opts);
        self.workers[index].shared.ready.set();
        self.wait_policy(index, input, reader, opts)
    }

    /// Runs a call synchronously on slot 0, draining it immediately.
    fn execute_inline(
        &mut self,
        input: &[u8],
        pending: Pending,
        opts: &ExecOpts,
    ) -> Result<(), ExecError> {
        self.maybe_enable_cover(0, opts);
        self.dispatch(0, &pending, opts);
        {
            let shared = self.workers[0].shared.clone();
            let mut job = shared.job.lock().expect("poisoned");
            run_call(&*self.target, 0, &mut job);
        }
        self.workers[0].shared.done.set();
        self.drain_completion(0, input, opts)
    }

    /// Records call metadata on a slot and fills its job cell. The slot's
    /// `done` event must be set and drained.
    fn dispatch(&mut self, index: usize, pending: &Pending, opts: &ExecOpts) {
        let inject = opts.flags.contains(ExecFlags::INJECT_FAULT)
            && pending.call_index == opts.fault_call;
        let collect_cover = self.wants_cover(opts);

        let worker = &mut self.workers[index];
        worker.shared.done.reset();
        {
            let mut job = worker.shared.job.lock().expect("poisoned");
            job.call_num = pending.num;
            job.num_args = pending.num_args;
            job.args = pending.args;
            job.inject_fault = inject;
            job.fault_nth = opts.fault_nth;
            job.collect_cover = collect_cover;
        }
        worker.call_index = pending.call_index;
        worker.call_num = pending.num;
        worker.copyout_index = pending.copyout_index;
        worker.copyout_pos = pending.copyout_pos;
        worker.handled = false;
        self.running += 1;
    }

    fn spawn_worker(&mut self, index: usize) {
        let worker = &mut self.workers[index];
        let target = self.target.clone();
        let shared = worker.shared.clone();
        thread::Builder::new()
            .name(format!("harrier-worker-{index}"))
            .spawn(move || worker_loop(target, shared, index))
            .expect("spawn worker thread");
        worker.spawned = true;
        tracing::debug!(worker = index, "worker spawned");
    }

    fn wants_cover(&self, opts: &ExecOpts) -> bool {
        self.env.contains(EnvFlags::COVER)
            && opts
                .flags
                .intersects(ExecFlags::COLLECT_COVER | ExecFlags::COLLECT_COMPS)
    }

    /// Arms the worker's coverage device for the trace mode this request
    /// wants. Called on every dispatch: a worker may have been spawned by
    /// a request that collected nothing, and a device armed for edge
    /// tracing must be re-armed before serving a comparison request.
    fn maybe_enable_cover(&mut self, index: usize, opts: &ExecOpts) {
        if !self.wants_cover(opts) {
            return;
        }
        let comps = opts.flags.contains(ExecFlags::COLLECT_COMPS);
        if self.workers[index].cover_mode != Some(comps) {
            self.target.cover_enable(index, comps);
            self.workers[index].cover_mode = Some(comps);
        }
    }

    /// Post-dispatch waiting policy: wait for the scheduled call unless
    /// colliding on an even index, then grant completed stragglers a
    /// grace window and drain them.
    fn wait_policy(
        &mut self,
        scheduled: usize,
        input: &[u8],
        reader: &WordReader<'_>,
        opts: &ExecOpts,
    ) -> Result<(), ExecError> {
        let skip_wait = self.collide && self.workers[scheduled].call_index % 2 == 0;
        if !skip_wait {
            let timeout = if self.env.contains(EnvFlags::DEBUG) {
                COMPLETION_TIMEOUT_DEBUG
            } else {
                COMPLETION_TIMEOUT
            };
            if !self.workers[scheduled].shared.done.timed_wait(timeout) {
                tracing::debug!(
                    call_index = self.workers[scheduled].call_index,
                    "completion wait timed out"
                );
            }
        }
        if self.running > 0 && self.any_completion_pending() {
            let at_eof = reader.peek_word() == Ok(INSTR_EOF);
            thread::sleep(if at_eof { GRACE_PERIOD_FINAL } else { GRACE_PERIOD });
            for index in 0..self.workers.len() {
                if self.completion_pending(index) {
                    self.drain_completion(index, input, opts)?;
                }
            }
        }
        Ok(())
    }

    fn completion_pending(&self, index: usize) -> bool {
        let worker = &self.workers[index];
        worker.spawned && !worker.handled && worker.shared.done.is_set()
    }

    fn any_completion_pending(&self) -> bool {
        (0..self.workers.len()).any(|i| self.completion_pending(i))
    }

    /// Bounded sweep over still-running calls after the stream ends.
    /// Stragglers that miss the budget keep running and go unreported.
    fn final_drain(&mut self, input: &[u8], opts: &ExecOpts) -> Result<(), ExecError> {
        let deadline = Instant::now() + FINAL_DRAIN_BUDGET;
        for index in 0..self.workers.len() {
            if self.workers[index].spawned && !self.workers[index].handled {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if self.workers[index].shared.done.timed_wait(remaining) {
                    self.drain_completion(index, input, opts)?;
                } else {
                    tracing::debug!(
                        worker = index,
                        call_index = self.workers[index].call_index,
                        "call still running at end of program"
                    );
                }
            }
        }
        Ok(())
    }

    /// Absorbs one completed call: publishes its return value and
    /// copyouts to the result table and, outside collide replay, appends
    /// its output record.
    fn drain_completion(
        &mut self,
        index: usize,
        input: &[u8],
        opts: &ExecOpts,
    ) -> Result<(), ExecError> {
        let (call_index, call_num, copyout_index, copyout_pos) = {
            let worker = &self.workers[index];
            if worker.handled || !worker.shared.done.is_set() || worker.shared.ready.is_set() {
                return Err(ExecError::BadWorkerState { worker: index });
            }
            (
                worker.call_index,
                worker.call_num,
                worker.copyout_index,
                worker.copyout_pos,
            )
        };
        let (res, errno, fault_injected, cover) = {
            let mut job = self.workers[index].shared.job.lock().expect("poisoned");
            (job.res, job.errno, job.fault_injected, std::mem::take(&mut job.cover))
        };
        tracing::trace!(call_index, res, errno, "completion");

        // A failed call publishes nothing; dependents resolve to the
        // placeholder instead of a stale or partial value.
        if res != -1 {
            if copyout_index != NO_COPYOUT {
                self.results[copyout_index as usize] = CallResult {
                    executed: true,
                    val: res as u64,
                };
            }
            let mut reader = WordReader::new(input);
            reader.seek(copyout_pos);
            while reader.peek_word() == Ok(INSTR_COPYOUT) {
                let _ = reader.read_word();
                let idx = reader.read_word()?;
                let addr = reader.read_word()?;
                let size = reader.read_word()?;
                if idx >= MAX_COMMANDS as Word {
                    return Err(ExecError::BadCopyoutIndex {
                        index: idx,
                        limit: MAX_COMMANDS,
                    });
                }
                let val = mem::copyout_value(&*self.target, addr, size)?;
                self.results[idx as usize] = CallResult {
                    executed: true,
                    val,
                };
            }
        }

        if !self.collide {
            let errno = if res == -1 { errno } else { 0 };
            self.write_record(call_index, call_num, errno, fault_injected, &cover, opts)?;
        }

        self.workers[index].handled = true;
        self.running = self
            .running
            .checked_sub(1)
            .ok_or(ExecError::RunningUnderflow)?;
        Ok(())
    }

    fn write_record(
        &mut self,
        call_index: u64,
        call_num: u64,
        errno: i32,
        fault_injected: bool,
        cover: &[u64],
        opts: &ExecOpts,
    ) -> Result<(), ExecError> {
        let comps = if opts.flags.contains(ExecFlags::COLLECT_COMPS) {
            comparisons(cover)
        } else {
            Vec::new()
        };
        let (sigs, pcs) = if !opts.flags.contains(ExecFlags::COLLECT_COMPS)
            && opts.flags.contains(ExecFlags::COLLECT_COVER)
        {
            let sigs = signals(cover, &mut self.dedup);
            let mut pcs: Vec<u32> = cover.iter().map(|&pc| pc as u32).collect();
            if opts.flags.contains(ExecFlags::DEDUP_COVER) {
                pcs.sort_unstable();
                pcs.dedup();
            }
            (sigs, pcs)
        } else {
            (Vec::new(), Vec::new())
        };

        let out = &mut self.output;
        out.write_u32(call_index as u32)?;
        out.write_u32(call_num as u32)?;
        out.write_u32(errno as u32)?;
        out.write_u32(fault_injected as u32)?;
        out.write_u32(sigs.len() as u32)?;
        out.write_u32(pcs.len() as u32)?;
        out.write_u32(comps.len() as u32)?;
        for sig in sigs {
            out.write_u32(sig)?;
        }
        for pc in pcs {
            out.write_u32(pc)?;
        }
        for comp in &comps {
            comp.write(out)?;
        }
        out.bump_completed();
        Ok(())
    }
}

impl<T: Target> Drop for Executor<T> {
    fn drop(&mut self) {
        // Workers park in `ready.wait()` between calls; flag shutdown and
        // wake them. A worker still inside a syscall exits as soon as it
        // comes back for the next job.
        for worker in &self.workers {
            if worker.spawned {
                if let Ok(mut job) = worker.shared.job.lock() {
                    job.shutdown = true;
                }
                worker.shared.ready.set();
            }
        }
    }
}
