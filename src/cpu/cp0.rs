//! System Control Coprocessor (COP0): status, cause, exception bookkeeping
//!
//! Only the registers the core actually models are backed by real state;
//! the breakpoint-support registers (3, 5, 7, 9, 11) are stored but never
//! acted on, matching real silicon nobody's BIOS ever programs seriously.

use crate::cpu::Exception;
use crate::num::U32Ext;

pub const PRID: u32 = 0x0000_0002;

/// `0x1F80_1000`-style cache control register at `0xFFFE_0130`; ignored
/// for emulation correctness but kept so reads observe what was written.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheControl {
    pub i_cache_enabled: bool,
    pub d_cache_enabled: bool,
    pub scratchpad_enabled: bool,
    raw: u32,
}

impl CacheControl {
    #[must_use]
    pub fn read(&self) -> u32 {
        self.raw
    }

    pub fn write(&mut self, value: u32) {
        self.raw = value;
        self.i_cache_enabled = value.bit(11);
        self.d_cache_enabled = value.bit(7);
        self.scratchpad_enabled = value.bit(3);
    }
}

/// `sr`, CP0 register 12.
#[derive(Debug, Clone)]
pub struct StatusRegister {
    pub boot_exception_vectors: bool,
    pub isolate_cache: bool,
    pub interrupt_mask: u8,
    pub kernel_mode: bool,
    pub interrupts_enabled: bool,
    pub kernel_mode_previous: bool,
    pub interrupts_enabled_previous: bool,
    pub kernel_mode_old: bool,
    pub interrupts_enabled_old: bool,
}

impl StatusRegister {
    fn new() -> Self {
        Self {
            boot_exception_vectors: true,
            isolate_cache: false,
            interrupt_mask: 0,
            kernel_mode: true,
            interrupts_enabled: false,
            kernel_mode_previous: true,
            interrupts_enabled_previous: false,
            kernel_mode_old: true,
            interrupts_enabled_old: false,
        }
    }

    #[must_use]
    pub fn read(&self) -> u32 {
        (u32::from(self.boot_exception_vectors) << 22)
            | (u32::from(self.isolate_cache) << 16)
            | (u32::from(self.interrupt_mask) << 8)
            | (u32::from(self.kernel_mode_old) << 5)
            | (u32::from(self.interrupts_enabled_old) << 4)
            | (u32::from(self.kernel_mode_previous) << 3)
            | (u32::from(self.interrupts_enabled_previous) << 2)
            | (u32::from(self.kernel_mode) << 1)
            | u32::from(self.interrupts_enabled)
    }

    pub fn write(&mut self, value: u32) {
        self.boot_exception_vectors = value.bit(22);
        self.isolate_cache = value.bit(16);
        self.interrupt_mask = (value >> 8) as u8;
        self.kernel_mode_old = value.bit(5);
        self.interrupts_enabled_old = value.bit(4);
        self.kernel_mode_previous = value.bit(3);
        self.interrupts_enabled_previous = value.bit(2);
        self.kernel_mode = value.bit(1);
        self.interrupts_enabled = value.bit(0);
    }

    /// `rfe`: pop the interrupt/kernel-mode stack by shifting bits 0..5
    /// right by two, leaving bits 4/5 (the oldest entry) untouched.
    fn restore_from_exception(&mut self) {
        self.kernel_mode = self.kernel_mode_previous;
        self.interrupts_enabled = self.interrupts_enabled_previous;
        self.kernel_mode_previous = self.kernel_mode_old;
        self.interrupts_enabled_previous = self.interrupts_enabled_old;
    }

    fn push_exception_stack(&mut self) {
        self.kernel_mode_old = self.kernel_mode_previous;
        self.interrupts_enabled_old = self.interrupts_enabled_previous;
        self.kernel_mode_previous = self.kernel_mode;
        self.interrupts_enabled_previous = self.interrupts_enabled;
        self.kernel_mode = true;
        self.interrupts_enabled = false;
    }
}

/// `cause`, CP0 register 13. Only bits 8-9 (software interrupt requests)
/// are writable; bit 10 (the single PS1 external interrupt line) is
/// driven directly by the interrupt controller.
#[derive(Debug, Clone, Default)]
pub struct CauseRegister {
    software_interrupt_pending: u8,
    external_interrupt_pending: bool,
    pub branch_delay: bool,
    pub branch_taken: bool,
    pub excode: u8,
    pub coprocessor_error: u8,
}

impl CauseRegister {
    #[must_use]
    pub fn read(&self) -> u32 {
        let ip = u32::from(self.software_interrupt_pending) | (u32::from(self.external_interrupt_pending) << 2);
        (u32::from(self.branch_delay) << 31)
            | (u32::from(self.branch_taken) << 30)
            | (u32::from(self.coprocessor_error) << 28)
            | (ip << 8)
            | (u32::from(self.excode) << 2)
    }

    pub fn write(&mut self, value: u32) {
        self.software_interrupt_pending = ((value >> 8) & 0x3) as u8;
    }

    pub fn set_external_interrupt_pending(&mut self, pending: bool) {
        self.external_interrupt_pending = pending;
    }

    /// What `sr.interrupt_mask` is ANDed against to decide if an interrupt fires.
    #[must_use]
    pub fn interrupt_pending_bits(&self) -> u8 {
        self.software_interrupt_pending | (u8::from(self.external_interrupt_pending) << 2)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemControlCoprocessor {
    pub cache_control: CacheControl,
    pub status: StatusRegister,
    pub cause: CauseRegister,
    pub epc: u32,
    pub bad_vaddr: u32,
    pub jumpdest: u32,
    breakpoint_on_execute: u32,
    breakpoint_on_execute_mask: u32,
    breakpoint_on_data_access: u32,
    breakpoint_on_data_access_mask: u32,
    breakpoint_control: u32,
}

impl Default for StatusRegister {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemControlCoprocessor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_control: CacheControl::default(),
            status: StatusRegister::new(),
            cause: CauseRegister::default(),
            epc: 0,
            bad_vaddr: 0,
            jumpdest: 0,
            breakpoint_on_execute: 0,
            breakpoint_on_execute_mask: 0,
            breakpoint_on_data_access: 0,
            breakpoint_on_data_access_mask: 0,
            breakpoint_control: 0,
        }
    }

    #[must_use]
    pub fn read_register(&self, register: u32) -> u32 {
        match register {
            3 => self.breakpoint_on_execute,
            5 => self.breakpoint_on_data_access,
            6 => self.jumpdest,
            7 => self.breakpoint_control,
            8 => self.bad_vaddr,
            9 => self.breakpoint_on_data_access_mask,
            11 => self.breakpoint_on_execute_mask,
            12 => self.status.read(),
            13 => self.cause.read(),
            14 => self.epc,
            15 => PRID,
            _ => {
                log::warn!("Unhandled CP0 register read: {register}");
                0
            }
        }
    }

    pub fn write_register(&mut self, register: u32, value: u32) {
        match register {
            3 => self.breakpoint_on_execute = value,
            5 => self.breakpoint_on_data_access = value,
            7 => self.breakpoint_control = value,
            9 => self.breakpoint_on_data_access_mask = value,
            11 => self.breakpoint_on_execute_mask = value,
            12 => self.status.write(value),
            13 => self.cause.write(value),
            _ => log::warn!("Unhandled CP0 register write: {register} = {value:08X}"),
        }
    }

    /// Dispatches on the low 6 bits of a COP0 `execute` opcode; only `rfe` (0x10) exists.
    pub fn execute_operation(&mut self, operation: u32) {
        match operation & 0x3F {
            0x10 => self.status.restore_from_exception(),
            op => log::warn!("Unhandled CP0 operation {op:02X}"),
        }
    }

    /// Per §4.1.2: push the interrupt stack, compute `epc`/`cause`/`jumpdest`,
    /// and return the handler address (`0xBFC0_0180` or `0x8000_0080`).
    ///
    /// `pc` is the instruction-after-next register (the CPU's `pc` as it
    /// stands once the pipeline has shifted past the excepting
    /// instruction); `jumpdest` only takes this value when the excepting
    /// instruction was itself in a branch delay slot, matching how real
    /// hardware records where execution would have resumed.
    pub fn enter_exception(
        &mut self,
        exception: Exception,
        current_pc: u32,
        pc: u32,
        in_delay_slot: bool,
        branch_taken: bool,
    ) -> u32 {
        self.status.push_exception_stack();

        self.cause.branch_delay = in_delay_slot;
        self.cause.branch_taken = in_delay_slot && branch_taken;
        self.cause.excode = exception.code();
        if let Exception::CopError(n) = exception {
            self.cause.coprocessor_error = n;
        }

        self.epc = if in_delay_slot { current_pc.wrapping_sub(4) } else { current_pc };
        if in_delay_slot {
            self.jumpdest = pc;
        }

        if self.status.boot_exception_vectors {
            0xBFC0_0180
        } else {
            0x8000_0080
        }
    }
}
