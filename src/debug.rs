//! Breakpoints, watchpoints, and the instruction trace ring buffer
//!
//! Pure bookkeeping: nothing here stops the CPU by itself. [`Cpu::step`]
//! consults [`Debugger::is_breakpoint`] and the watchpoint predicates and
//! a host loop decides what to do with that information (e.g. a GDB stub
//! would use this to answer `?`/`g`/`m` packets).

use std::collections::HashMap;

const TRACE_LEN: usize = 128;

#[derive(Debug, Clone, Copy, Default)]
struct Breakpoint {
    enabled: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Watchpoint {
    on_load: bool,
    on_store: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TraceEntry {
    pub address: u32,
    pub raw_instruction: u32,
}

/// A fixed-size ring buffer of the last [`TRACE_LEN`] fetched instructions.
#[derive(Debug, Clone)]
struct TraceRing {
    entries: Vec<TraceEntry>,
    next: usize,
}

impl TraceRing {
    fn new() -> Self {
        Self { entries: Vec::with_capacity(TRACE_LEN), next: 0 }
    }

    fn push(&mut self, entry: TraceEntry) {
        if self.entries.len() < TRACE_LEN {
            self.entries.push(entry);
        } else {
            self.entries[self.next] = entry;
        }
        self.next = (self.next + 1) % TRACE_LEN;
    }

    /// Oldest-to-newest order.
    fn iter(&self) -> impl Iterator<Item = &TraceEntry> {
        let (tail, head) = self.entries.split_at(self.next.min(self.entries.len()));
        head.iter().chain(tail.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PausedState {
    Running,
    Paused,
    SingleStepping,
}

/// Debugger-facing state: breakpoints, watchpoints, and an instruction
/// trace. Register access for a GDB-stub-style consumer goes through
/// [`crate::cpu::Cpu`] directly; this struct only holds what the CPU
/// itself cannot derive from its own fields.
#[derive(Debug, Clone)]
pub struct Debugger {
    breakpoints: HashMap<u32, Breakpoint>,
    watchpoints: HashMap<u32, Watchpoint>,
    trace: TraceRing,
    paused_state: PausedState,
}

impl Debugger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            breakpoints: HashMap::new(),
            watchpoints: HashMap::new(),
            trace: TraceRing::new(),
            paused_state: PausedState::Running,
        }
    }

    pub fn add_breakpoint(&mut self, address: u32) {
        self.breakpoints.insert(address, Breakpoint { enabled: true });
    }

    pub fn remove_breakpoint(&mut self, address: u32) {
        self.breakpoints.remove(&address);
    }

    pub fn toggle_breakpoint(&mut self, address: u32) {
        if let Some(bp) = self.breakpoints.get_mut(&address) {
            bp.enabled = !bp.enabled;
        }
    }

    #[must_use]
    pub fn is_breakpoint(&self, address: u32) -> bool {
        self.breakpoints.get(&address).is_some_and(|bp| bp.enabled)
    }

    pub fn add_watchpoint(&mut self, address: u32, on_load: bool, on_store: bool) {
        self.watchpoints.insert(address, Watchpoint { on_load, on_store });
    }

    pub fn remove_watchpoint(&mut self, address: u32) {
        self.watchpoints.remove(&address);
    }

    #[must_use]
    pub fn is_watchpoint_on_load(&self, address: u32) -> bool {
        self.watchpoints.get(&address).is_some_and(|wp| wp.on_load)
    }

    #[must_use]
    pub fn is_watchpoint_on_store(&self, address: u32) -> bool {
        self.watchpoints.get(&address).is_some_and(|wp| wp.on_store)
    }

    pub fn record_instruction(&mut self, address: u32, raw_instruction: u32) {
        self.trace.push(TraceEntry { address, raw_instruction });
    }

    pub fn trace(&self) -> impl Iterator<Item = &TraceEntry> {
        self.trace.iter()
    }

    pub fn set_paused_state(&mut self, state: PausedState) {
        self.paused_state = state;
    }

    #[must_use]
    pub fn paused_state(&self) -> PausedState {
        self.paused_state
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_breakpoint_flips_enabled() {
        let mut debugger = Debugger::new();
        debugger.add_breakpoint(0x8000_1000);
        assert!(debugger.is_breakpoint(0x8000_1000));

        debugger.toggle_breakpoint(0x8000_1000);
        assert!(!debugger.is_breakpoint(0x8000_1000));
    }

    #[test]
    fn trace_ring_wraps_and_keeps_order() {
        let mut debugger = Debugger::new();
        for i in 0..(TRACE_LEN as u32 + 5) {
            debugger.record_instruction(i * 4, i);
        }

        let collected: Vec<u32> = debugger.trace().map(|e| e.raw_instruction).collect();
        assert_eq!(collected.len(), TRACE_LEN);
        assert_eq!(*collected.first().unwrap(), 5);
        assert_eq!(*collected.last().unwrap(), TRACE_LEN as u32 + 4);
    }

    #[test]
    fn watchpoint_load_and_store_are_independent() {
        let mut debugger = Debugger::new();
        debugger.add_watchpoint(0x1000, true, false);
        assert!(debugger.is_watchpoint_on_load(0x1000));
        assert!(!debugger.is_watchpoint_on_store(0x1000));
    }
}
