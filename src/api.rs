//! Top-level system context: owns every component, drives the CPU loop
//!
//! Per §9's cyclic-component-references design note: nothing here holds a
//! permanent mutable reference to a sibling. [`Ps1Emulator::step`] builds a
//! transient [`Bus`] borrowing every component for the duration of one CPU
//! step, which sidesteps Rust's aliasing rules without `unsafe`.

use crate::bus::Bus;
use crate::cd::CdRom;
use crate::cpu::Cpu;
use crate::debug::Debugger;
use crate::dma::DmaController;
use crate::error::{Ps1Error, Ps1Result};
use crate::gpu::Gpu;
use crate::interrupts::InterruptController;
use crate::joypad::Joypad;
use crate::memory::Memory;
use crate::scheduler::Scheduler;
use crate::spu::Spu;
use crate::timers::Timers;

const PS_EXE_MAGIC: &[u8; 8] = b"PS-X EXE";
const PS_EXE_HEADER_LEN: usize = 0x800;

#[derive(Debug)]
pub struct Ps1Emulator {
    cpu: Cpu,
    memory: Memory,
    dma: DmaController,
    interrupts: InterruptController,
    timers: Timers,
    scheduler: Scheduler,
    gpu: Gpu,
    cd: CdRom,
    spu: Spu,
    joypad: Joypad,
    debugger: Debugger,
}

/// Constructs an [`Ps1Emulator`] from a BIOS image and an optional PS-EXE
/// sideload, mirroring the two-phase "construct then wire" sequence in §9:
/// every component is built first, and only [`Ps1Emulator::new`] assembles
/// the transient back-references between them.
#[derive(Debug)]
pub struct Ps1EmulatorBuilder {
    bios_rom: Vec<u8>,
    exe: Option<Vec<u8>>,
}

impl Ps1EmulatorBuilder {
    #[must_use]
    pub fn new(bios_rom: Vec<u8>) -> Self {
        Self { bios_rom, exe: None }
    }

    #[must_use]
    pub fn with_exe(mut self, exe: Vec<u8>) -> Self {
        self.exe = Some(exe);
        self
    }

    /// # Errors
    ///
    /// Returns an error if the BIOS ROM is the wrong size or the PS-EXE
    /// (if provided) fails header validation.
    pub fn build(self) -> Ps1Result<Ps1Emulator> {
        let mut emulator = Ps1Emulator::new(self.bios_rom)?;
        if let Some(exe) = self.exe {
            emulator.sideload_exe(&exe)?;
        }
        Ok(emulator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEffect {
    None,
    FrameRendered,
}

impl Ps1Emulator {
    #[must_use]
    pub fn builder(bios_rom: Vec<u8>) -> Ps1EmulatorBuilder {
        Ps1EmulatorBuilder::new(bios_rom)
    }

    /// # Errors
    ///
    /// Returns an error if the BIOS ROM is not exactly 512 KiB.
    pub fn new(bios_rom: Vec<u8>) -> Ps1Result<Self> {
        Ok(Self {
            cpu: Cpu::new(),
            memory: Memory::new(bios_rom)?,
            dma: DmaController::new(),
            interrupts: InterruptController::new(),
            timers: Timers::new(),
            scheduler: Scheduler::new(),
            gpu: Gpu::new(),
            cd: CdRom::new(),
            spu: Spu::new(),
            joypad: Joypad::new(),
            debugger: Debugger::new(),
        })
    }

    #[must_use]
    pub fn cpu_pc(&self) -> u32 {
        self.cpu.regs.pc
    }

    #[must_use]
    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    #[must_use]
    pub fn debugger_mut(&mut self) -> &mut Debugger {
        &mut self.debugger
    }

    /// Validate and inject a PS-EXE (§6), rewriting the CPU's `pc`/`next_pc`
    /// to the sideloaded entry point and discarding any in-flight delay
    /// state, same as a cold jump.
    ///
    /// # Errors
    ///
    /// Returns [`Ps1Error::InvalidExeFormat`] if the file is too short to
    /// hold the header or does not carry the `PS-X EXE` magic.
    pub fn sideload_exe(&mut self, exe: &[u8]) -> Ps1Result<()> {
        if exe.len() < PS_EXE_HEADER_LEN || &exe[..8] != PS_EXE_MAGIC {
            return Err(Ps1Error::InvalidExeFormat);
        }

        let text_start = u32::from_le_bytes(exe[0x18..0x1C].try_into().unwrap());
        let text_size = u32::from_le_bytes(exe[0x1C..0x20].try_into().unwrap()) as usize;

        let end = PS_EXE_HEADER_LEN + text_size;
        let Some(payload) = exe.get(PS_EXE_HEADER_LEN..end.min(exe.len())) else {
            return Err(Ps1Error::InvalidExeFormat);
        };

        self.memory.copy_to_main_ram(payload, text_start & 0x1FFF_FFFF);
        self.cpu.jump_to(text_start);

        log::debug!("PS-EXE sideloaded: entry 0x{text_start:08X}, {} bytes", payload.len());
        Ok(())
    }

    fn bus(&mut self) -> Bus<'_> {
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

    /// Execute exactly one CPU instruction and let its cycle charge fan out
    /// through the scheduler. Returns whether the GPU stand-in's
    /// `draw_frame` flag became set during this step, per §5's frame-pacing
    /// contract ("the frontend polls it after each CPU step").
    pub fn step(&mut self) -> StepEffect {
        self.gpu.draw_frame = false;

        let mut bus = self.bus();
        self.cpu.step(&mut bus, &mut self.debugger);

        if self.gpu.draw_frame {
            StepEffect::FrameRendered
        } else {
            StepEffect::None
        }
    }

    /// Run until a breakpoint is hit, a full frame completes, or
    /// `max_steps` instructions retire, whichever comes first. A simple
    /// batching loop for frontends that do not need per-instruction
    /// control; the debugger's own single-step mode should call
    /// [`Ps1Emulator::step`] directly instead.
    pub fn run_until_frame_or_breakpoint(&mut self, max_steps: u32) -> StepEffect {
        for _ in 0..max_steps {
            if self.debugger.is_breakpoint(self.cpu_pc()) {
                break;
            }
            if self.step() == StepEffect::FrameRendered {
                return StepEffect::FrameRendered;
            }
        }
        StepEffect::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BIOS_ROM_LEN;

    fn make_exe(entry_pc: u32, text_start: u32, payload: &[u8]) -> Vec<u8> {
        let mut exe = vec![0u8; PS_EXE_HEADER_LEN + payload.len()];
        exe[..8].copy_from_slice(PS_EXE_MAGIC);
        exe[0x10..0x14].copy_from_slice(&entry_pc.to_le_bytes());
        exe[0x18..0x1C].copy_from_slice(&text_start.to_le_bytes());
        exe[0x1C..0x20].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        exe[PS_EXE_HEADER_LEN..].copy_from_slice(payload);
        exe
    }

    #[test]
    fn rejects_exe_without_magic() {
        let mut emulator = Ps1Emulator::new(vec![0; BIOS_ROM_LEN]).unwrap();
        let bad = vec![0u8; PS_EXE_HEADER_LEN];
        assert!(matches!(emulator.sideload_exe(&bad), Err(Ps1Error::InvalidExeFormat)));
    }

    #[test]
    fn sideload_rewrites_pc_to_text_start() {
        let mut emulator = Ps1Emulator::new(vec![0; BIOS_ROM_LEN]).unwrap();
        // lui $t0, 0x1234
        let exe = make_exe(0x8010_0000, 0x8010_0000, &0x3C08_1234u32.to_le_bytes());
        emulator.sideload_exe(&exe).unwrap();

        assert_eq!(emulator.cpu_pc(), 0x8010_0000);
    }

    #[test]
    fn wrong_bios_size_fails_construction() {
        let result = Ps1Emulator::new(vec![0; BIOS_ROM_LEN - 1]);
        assert!(result.is_err());
    }

    #[test]
    fn single_step_advances_pc() {
        let mut emulator = Ps1Emulator::new(vec![0; BIOS_ROM_LEN]).unwrap();
        let pc_before = emulator.cpu_pc();
        emulator.step();
        assert_ne!(emulator.cpu_pc(), pc_before);
    }
}
