//! MIPS R3000A interpreter: load-delay and branch-delay semantics, exception dispatch
//!
//! One instruction per [`Cpu::step`]. The load-delay and branch-delay
//! pipelines are modeled as explicit two-generation state rather than a
//! literal cycle-by-cycle pipeline; see [`LoadDelaySlot`].

pub mod cp0;
pub mod disassemble;
pub mod gte;
mod instructions;

use crate::bus::Bus;
use crate::cpu::cp0::SystemControlCoprocessor;
use crate::cpu::gte::Gte;
use crate::debug::Debugger;
use crate::num::U32Ext;

const RESET_PC: u32 = 0xBFC0_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Interrupt,
    LoadAddress,
    StoreAddress,
    Syscall,
    Break,
    ReservedInstr,
    CopError(u8),
    Overflow,
}

impl Exception {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Interrupt => 0x00,
            Self::LoadAddress => 0x04,
            Self::StoreAddress => 0x05,
            Self::Syscall => 0x08,
            Self::Break => 0x09,
            Self::ReservedInstr => 0x0A,
            Self::CopError(_) => 0x0B,
            Self::Overflow => 0x0C,
        }
    }
}

/// A write that has not yet landed in the register file. `register == 0`
/// means "no pending write" since writes to `r[0]` are always discarded
/// anyway, so there is no need for an `Option`.
#[derive(Debug, Clone, Copy, Default)]
struct LoadDelaySlot {
    register: u8,
    value: u32,
}

#[derive(Debug, Clone)]
pub struct Registers {
    pub gpr: [u32; 32],
    pub pc: u32,
    pub next_pc: u32,
    pub current_pc: u32,
    pub hi: u32,
    pub lo: u32,
}

impl Registers {
    fn new() -> Self {
        Self {
            gpr: [0; 32],
            pc: RESET_PC,
            next_pc: RESET_PC.wrapping_add(4),
            current_pc: RESET_PC,
            hi: 0,
            lo: 0,
        }
    }

    #[must_use]
    pub fn read(&self, index: u8) -> u32 {
        self.gpr[index as usize]
    }

    /// A direct register write, as opposed to one flowing through the
    /// load-delay pipeline.
    pub fn write(&mut self, index: u8, value: u32) {
        self.gpr[index as usize] = value;
        self.gpr[0] = 0;
    }
}

#[derive(Debug, Clone)]
pub struct Cpu {
    pub regs: Registers,
    pub cp0: SystemControlCoprocessor,
    pub gte: Gte,

    load_delay_pending: LoadDelaySlot,
    load_delay_new: LoadDelaySlot,

    in_delay_slot: bool,
    branch_taken: bool,
}

impl Cpu {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            cp0: SystemControlCoprocessor::new(),
            gte: Gte::new(),
            load_delay_pending: LoadDelaySlot::default(),
            load_delay_new: LoadDelaySlot::default(),
            in_delay_slot: false,
            branch_taken: false,
        }
    }

    /// Rewrites `pc`/`next_pc` and the prefetch-adjacent state to begin
    /// execution at a PS-EXE's entry point, discarding any in-flight
    /// load/branch delay state.
    pub fn jump_to(&mut self, pc: u32) {
        self.regs.pc = pc;
        self.regs.next_pc = pc.wrapping_add(4);
        self.load_delay_pending = LoadDelaySlot::default();
        self.load_delay_new = LoadDelaySlot::default();
        self.in_delay_slot = false;
        self.branch_taken = false;
    }

    /// A register read that accounts for a load still in flight: if the
    /// pending slot targets `index`, return its value, matching how real
    /// hardware forwards "the value about to land" to a dependent read
    /// that races it.
    #[must_use]
    fn read_with_pending_load(&self, index: u8) -> u32 {
        if self.load_delay_pending.register == index && index != 0 {
            self.load_delay_pending.value
        } else {
            self.regs.read(index)
        }
    }

    /// A direct write (not through the load-delay pipeline). Invalidates
    /// a same-register pending load, since the direct write wins.
    fn set_register(&mut self, index: u8, value: u32) {
        if index == 0 {
            return;
        }
        if self.load_delay_pending.register == index {
            self.load_delay_pending = LoadDelaySlot::default();
        }
        self.regs.write(index, value);
    }

    /// Queues `value` to land in `index` at the end of *this* step, after
    /// the currently pending load (if any) commits.
    fn delayed_load(&mut self, index: u8, value: u32) {
        if self.load_delay_pending.register == index {
            // A direct write or a second delayed load to the same
            // register in one instruction; the newer one wins the slot.
            self.load_delay_pending = LoadDelaySlot::default();
        }
        self.load_delay_new = LoadDelaySlot { register: index, value };
    }

    fn commit_load_delay(&mut self) {
        if self.load_delay_pending.register != 0 {
            self.regs.write(self.load_delay_pending.register, self.load_delay_pending.value);
        }
        self.load_delay_pending = self.load_delay_new;
        self.load_delay_new = LoadDelaySlot::default();
        self.regs.gpr[0] = 0;
    }

    fn raise_exception(
        &mut self,
        exception: Exception,
        current_pc: u32,
        pc: u32,
        was_in_delay_slot: bool,
        was_branch_taken: bool,
    ) {
        let handler = self.cp0.enter_exception(exception, current_pc, pc, was_in_delay_slot, was_branch_taken);
        self.regs.pc = handler;
        self.regs.next_pc = handler.wrapping_add(4);
    }

    /// Execute exactly one instruction, per the contract in §4.1.
    pub fn step(&mut self, bus: &mut Bus, debugger: &mut Debugger) {
        let was_in_delay_slot = self.in_delay_slot;
        let was_branch_taken = self.branch_taken;
        self.in_delay_slot = false;
        self.branch_taken = false;

        self.cp0.cause.set_external_interrupt_pending(bus.interrupts.pending());
        let interrupt_pending =
            self.cp0.cause.interrupt_pending_bits() & self.cp0.status.interrupt_mask != 0
                && self.cp0.status.interrupts_enabled;

        if interrupt_pending {
            let peeked = bus.load32(self.regs.pc);
            if !is_gte_command(peeked) {
                self.raise_exception(
                    Exception::Interrupt,
                    self.regs.pc,
                    self.regs.next_pc,
                    was_in_delay_slot,
                    was_branch_taken,
                );
                // No fetch effect this step: the load-delay slot still
                // advances so in-flight loads are not silently dropped.
                self.commit_load_delay();
                return;
            }
        }

        let instruction = bus.load32(self.regs.pc);
        debugger.record_instruction(self.regs.pc, instruction);

        self.regs.current_pc = self.regs.pc;
        self.regs.pc = self.regs.next_pc;
        self.regs.next_pc = self.regs.pc.wrapping_add(4);

        if self.regs.current_pc & 0x3 != 0 {
            self.raise_exception(
                Exception::LoadAddress,
                self.regs.current_pc,
                self.regs.pc,
                was_in_delay_slot,
                was_branch_taken,
            );
            self.commit_load_delay();
            return;
        }

        if let Err(exception) = self.execute(instruction, bus) {
            self.raise_exception(exception, self.regs.current_pc, self.regs.pc, was_in_delay_slot, was_branch_taken);
            self.commit_load_delay();
            return;
        }

        self.commit_load_delay();
        bus.charge_cycles(2);
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use]
fn is_gte_command(word: u32) -> bool {
    word >> 26 == 0x12 && word.bit(25)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cd::CdRom;
    use crate::dma::DmaController;
    use crate::gpu::Gpu;
    use crate::interrupts::InterruptController;
    use crate::joypad::Joypad;
    use crate::memory::{Memory, BIOS_ROM_LEN};
    use crate::scheduler::Scheduler;
    use crate::spu::Spu;
    use crate::timers::Timers;

    struct Harness {
        memory: Memory,
        dma: DmaController,
        interrupts: InterruptController,
        timers: Timers,
        scheduler: Scheduler,
        gpu: Gpu,
        cd: CdRom,
        spu: Spu,
        joypad: Joypad,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                memory: Memory::new(vec![0; BIOS_ROM_LEN]).unwrap(),
                dma: DmaController::new(),
                interrupts: InterruptController::new(),
                timers: Timers::new(),
                scheduler: Scheduler::new(),
                gpu: Gpu::new(),
                cd: CdRom::new(),
                spu: Spu::new(),
                joypad: Joypad::new(),
            }
        }

        fn bus(&mut self) -> Bus {
            Bus {
                memory: &mut self.memory,
                dma: &mut self.dma,
                interrupts: &mut self.interrupts,
                timers: &mut self.timers,
                scheduler: &mut self.scheduler,
                gpu: &mut self.gpu,
                cd: &mut self.cd,
                spu: &mut self.spu,
                joypad: &mut self.joypad,
            }
        }
    }

    fn load_program(harness: &mut Harness, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            harness.memory.write_main_ram_u32((i as u32) * 4, *word);
        }
    }

    #[test]
    fn lui_ori_pair_builds_full_address() {
        let mut harness = Harness::new();
        // lui $t0, 0x1F80 ; ori $t0, $t0, 0x1074
        load_program(&mut harness, &[0x3C08_1F80, 0x3508_1074]);

        let mut cpu = Cpu::new();
        cpu.jump_to(0);
        let mut debugger = Debugger::new();

        cpu.step(&mut harness.bus(), &mut debugger);
        cpu.step(&mut harness.bus(), &mut debugger);

        assert_eq!(cpu.regs.read(8), 0x1F80_1074);
    }

    #[test]
    fn load_delay_slot_reads_stale_value() {
        let mut harness = Harness::new();
        // addi $t1, $0, 5 ; lw $t1, 0($t2) ; addi $t3, $t1, 0
        load_program(&mut harness, &[0x2009_0005, 0x8D49_0000, 0x212B_0000]);
        harness.memory.write_main_ram_u32(0, 99); // mem[r[t2]=0] = 99 (overwrites word 0, fine pre-fetch)

        let mut cpu = Cpu::new();
        cpu.jump_to(0);
        cpu.regs.write(10, 0x100); // $t2 points elsewhere so the program text survives
        harness.memory.write_main_ram_u32(0x100, 99);
        let mut debugger = Debugger::new();

        cpu.step(&mut harness.bus(), &mut debugger); // addi $t1, $0, 5
        cpu.step(&mut harness.bus(), &mut debugger); // lw $t1, 0($t2) -- delayed
        cpu.step(&mut harness.bus(), &mut debugger); // addi $t3, $t1, 0 -- sees stale $t1

        assert_eq!(cpu.regs.read(11), 5);
        assert_eq!(cpu.regs.read(9), 99);
    }

    #[test]
    fn branch_delay_slot_executes_once_before_target() {
        let mut harness = Harness::new();
        // beq $0, $0, 2 ; addi $v0, $0, 1 ; addi $v0, $0, 2
        load_program(&mut harness, &[0x1000_0002, 0x2002_0001, 0x2002_0002]);

        let mut cpu = Cpu::new();
        cpu.jump_to(0);
        let mut debugger = Debugger::new();

        cpu.step(&mut harness.bus(), &mut debugger); // beq (taken)
        cpu.step(&mut harness.bus(), &mut debugger); // delay slot: $v0 = 1
        cpu.step(&mut harness.bus(), &mut debugger); // target: $v0 = 2

        assert_eq!(cpu.regs.read(2), 2);
    }

    #[test]
    fn r0_is_always_zero_after_step() {
        let mut harness = Harness::new();
        load_program(&mut harness, &[0x2000_0005]); // addi $0, $0, 5 (no-op architecturally)

        let mut cpu = Cpu::new();
        cpu.jump_to(0);
        let mut debugger = Debugger::new();
        cpu.step(&mut harness.bus(), &mut debugger);

        assert_eq!(cpu.regs.read(0), 0);
    }
}
