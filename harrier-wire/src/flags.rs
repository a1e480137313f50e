//! Flag words of the control protocol.

bitflags::bitflags! {
    /// Process-lifetime environment flags, fixed at handshake.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EnvFlags: u64 {
        /// Verbose diagnostics; also stretches completion timeouts.
        const DEBUG = 1 << 0;
        /// Coverage collection is available on this target.
        const COVER = 1 << 1;
        /// Drop privileges via setuid before executing programs.
        const SANDBOX_SETUID = 1 << 2;
        /// Isolate the program in fresh namespaces.
        const SANDBOX_NAMESPACE = 1 << 3;
        /// Set up the tun/tap test network device.
        const ENABLE_TUN = 1 << 4;
        /// Fault injection is available on this target.
        const ENABLE_FAULT_INJECTION = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Per-request execution flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ExecFlags: u64 {
        /// Collect coverage for each call.
        const COLLECT_COVER = 1 << 0;
        /// Sort and deduplicate the raw PC list per call.
        const DEDUP_COVER = 1 << 1;
        /// Inject a fault into one call of the program.
        const INJECT_FAULT = 1 << 2;
        /// Collect comparison operands instead of edge coverage.
        const COLLECT_COMPS = 1 << 3;
        /// Dispatch calls onto worker threads.
        const THREADED = 1 << 4;
        /// Re-execute the program without waiting on alternate calls.
        const COLLIDE = 1 << 5;
    }
}
