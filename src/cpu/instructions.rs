//! R3000A instruction semantics
//!
//! One method per instruction family; [`Cpu::execute`] decodes and
//! dispatches. Exceptions are returned as `Err`, never raised directly,
//! so [`Cpu::step`] is the single place that pushes the exception stack.

use crate::bus::Bus;
use crate::cpu::{Cpu, Exception};
use crate::num::{sign_extend, U32Ext};

struct Fields {
    op: u32,
    rs: u8,
    rt: u8,
    rd: u8,
    shamt: u32,
    funct: u32,
    imm16: u32,
    imm26: u32,
}

#[must_use]
fn decode(instruction: u32) -> Fields {
    Fields {
        op: instruction >> 26,
        rs: ((instruction >> 21) & 0x1F) as u8,
        rt: ((instruction >> 16) & 0x1F) as u8,
        rd: ((instruction >> 11) & 0x1F) as u8,
        shamt: (instruction >> 6) & 0x1F,
        funct: instruction & 0x3F,
        imm16: instruction & 0xFFFF,
        imm26: instruction & 0x03FF_FFFF,
    }
}

impl Cpu {
    /// Decode and execute one instruction. Returns the exception to raise,
    /// if any; on `Err` no further register/memory effects beyond what
    /// already happened are committed (matching real hardware, where a
    /// trapping instruction's partial results never reach the register file).
    pub(super) fn execute(&mut self, instruction: u32, bus: &mut Bus) -> Result<(), Exception> {
        let f = decode(instruction);

        match f.op {
            0x00 => self.execute_special(&f),
            0x01 => self.execute_bcond(&f),
            0x02 => {
                self.jump_to_target((self.regs.pc & 0xF000_0000) | (f.imm26 << 2));
                Ok(())
            }
            0x03 => {
                self.set_register(31, self.regs.pc.wrapping_add(4));
                self.jump_to_target((self.regs.pc & 0xF000_0000) | (f.imm26 << 2));
                Ok(())
            }
            0x04 => self.branch_if(&f, self.rs_val(&f) == self.rt_val(&f)),
            0x05 => self.branch_if(&f, self.rs_val(&f) != self.rt_val(&f)),
            0x06 => self.branch_if(&f, (self.rs_val(&f) as i32) <= 0),
            0x07 => self.branch_if(&f, (self.rs_val(&f) as i32) > 0),
            0x08 => self.addi(&f, true),
            0x09 => self.addi(&f, false),
            0x0A => {
                let result = (self.rs_val(&f) as i32) < sign_extend(f.imm16, 16);
                self.set_register(f.rt, result as u32);
                Ok(())
            }
            0x0B => {
                let result = self.rs_val(&f) < sign_extend(f.imm16, 16) as u32;
                self.set_register(f.rt, result as u32);
                Ok(())
            }
            0x0C => {
                self.set_register(f.rt, self.rs_val(&f) & f.imm16);
                Ok(())
            }
            0x0D => {
                self.set_register(f.rt, self.rs_val(&f) | f.imm16);
                Ok(())
            }
            0x0E => {
                self.set_register(f.rt, self.rs_val(&f) ^ f.imm16);
                Ok(())
            }
            0x0F => {
                self.set_register(f.rt, f.imm16 << 16);
                Ok(())
            }
            0x10 => self.execute_cop0(&f),
            0x11 => Err(Exception::CopError(1)),
            0x12 => self.execute_cop2(&f, instruction),
            0x13 => Err(Exception::CopError(3)),
            0x20 => self.load(&f, bus, 1, true),
            0x21 => self.load(&f, bus, 2, true),
            0x23 => self.load(&f, bus, 4, true),
            0x24 => self.load(&f, bus, 1, false),
            0x25 => self.load(&f, bus, 2, false),
            0x22 => self.lwl(&f, bus),
            0x26 => self.lwr(&f, bus),
            0x28 => self.store8(&f, bus),
            0x29 => self.store16(&f, bus),
            0x2B => self.store32(&f, bus),
            0x2A => self.swl(&f, bus),
            0x2E => self.swr(&f, bus),
            0x32 => self.lwc2(&f, bus),
            0x3A => self.swc2(&f, bus),
            0x30..=0x33 if f.op != 0x32 => Err(Exception::CopError((f.op - 0x30) as u8)),
            0x38..=0x3B if f.op != 0x3A => Err(Exception::CopError((f.op - 0x38) as u8)),
            _ => Err(Exception::ReservedInstr),
        }
    }

    #[must_use]
    fn rs_val(&self, f: &Fields) -> u32 {
        self.read_with_pending_load(f.rs)
    }

    #[must_use]
    fn rt_val(&self, f: &Fields) -> u32 {
        self.read_with_pending_load(f.rt)
    }

    /// Marks the instruction following this one as executing in a delay
    /// slot, and (if `taken`) redirects the pipeline so the branch target
    /// is fetched after it.
    fn jump_to_target(&mut self, target: u32) {
        self.in_delay_slot = true;
        self.branch_taken = true;
        self.regs.next_pc = target;
    }

    fn branch_if(&mut self, f: &Fields, taken: bool) -> Result<(), Exception> {
        self.in_delay_slot = true;
        self.branch_taken = taken;
        if taken {
            let offset = sign_extend(f.imm16, 16) << 2;
            self.regs.next_pc = self.regs.current_pc.wrapping_add(4).wrapping_add(offset as u32);
        }
        Ok(())
    }

    fn execute_bcond(&mut self, f: &Fields) -> Result<(), Exception> {
        let link = f.rt & 0x10 != 0;
        let is_bgez = f.rt & 0x01 != 0;
        let rs = self.rs_val(f) as i32;
        let taken = if is_bgez { rs >= 0 } else { rs < 0 };

        if link {
            self.set_register(31, self.regs.pc.wrapping_add(4));
        }
        self.branch_if(f, taken)
    }

    fn addi(&mut self, f: &Fields, trap_on_overflow: bool) -> Result<(), Exception> {
        let rs = self.rs_val(f) as i32;
        let imm = sign_extend(f.imm16, 16);
        match rs.checked_add(imm) {
            Some(result) => {
                self.set_register(f.rt, result as u32);
                Ok(())
            }
            None if trap_on_overflow => Err(Exception::Overflow),
            None => {
                self.set_register(f.rt, rs.wrapping_add(imm) as u32);
                Ok(())
            }
        }
    }

    fn execute_special(&mut self, f: &Fields) -> Result<(), Exception> {
        match f.funct {
            0x00 => {
                self.set_register(f.rd, self.rt_val(f) << f.shamt);
                Ok(())
            }
            0x02 => {
                self.set_register(f.rd, self.rt_val(f) >> f.shamt);
                Ok(())
            }
            0x03 => {
                self.set_register(f.rd, ((self.rt_val(f) as i32) >> f.shamt) as u32);
                Ok(())
            }
            0x04 => {
                self.set_register(f.rd, self.rt_val(f) << (self.rs_val(f) & 0x1F));
                Ok(())
            }
            0x06 => {
                self.set_register(f.rd, self.rt_val(f) >> (self.rs_val(f) & 0x1F));
                Ok(())
            }
            0x07 => {
                let shift = self.rs_val(f) & 0x1F;
                self.set_register(f.rd, ((self.rt_val(f) as i32) >> shift) as u32);
                Ok(())
            }
            0x08 => self.jr(f),
            0x09 => self.jalr(f),
            0x0C => Err(Exception::Syscall),
            0x0D => Err(Exception::Break),
            0x10 => {
                self.set_register(f.rd, self.regs.hi);
                Ok(())
            }
            0x11 => {
                self.regs.hi = self.rs_val(f);
                Ok(())
            }
            0x12 => {
                self.set_register(f.rd, self.regs.lo);
                Ok(())
            }
            0x13 => {
                self.regs.lo = self.rs_val(f);
                Ok(())
            }
            0x18 => {
                let result = i64::from(self.rs_val(f) as i32) * i64::from(self.rt_val(f) as i32);
                self.regs.lo = result as u32;
                self.regs.hi = (result >> 32) as u32;
                Ok(())
            }
            0x19 => {
                let result = u64::from(self.rs_val(f)) * u64::from(self.rt_val(f));
                self.regs.lo = result as u32;
                self.regs.hi = (result >> 32) as u32;
                Ok(())
            }
            0x1A => {
                self.div_signed(f);
                Ok(())
            }
            0x1B => {
                self.div_unsigned(f);
                Ok(())
            }
            0x20 => self.add_checked(f, true),
            0x21 => {
                self.set_register(f.rd, self.rs_val(f).wrapping_add(self.rt_val(f)));
                Ok(())
            }
            0x22 => self.sub_checked(f),
            0x23 => {
                self.set_register(f.rd, self.rs_val(f).wrapping_sub(self.rt_val(f)));
                Ok(())
            }
            0x24 => {
                self.set_register(f.rd, self.rs_val(f) & self.rt_val(f));
                Ok(())
            }
            0x25 => {
                self.set_register(f.rd, self.rs_val(f) | self.rt_val(f));
                Ok(())
            }
            0x26 => {
                self.set_register(f.rd, self.rs_val(f) ^ self.rt_val(f));
                Ok(())
            }
            0x27 => {
                self.set_register(f.rd, !(self.rs_val(f) | self.rt_val(f)));
                Ok(())
            }
            0x2A => {
                let result = (self.rs_val(f) as i32) < (self.rt_val(f) as i32);
                self.set_register(f.rd, result as u32);
                Ok(())
            }
            0x2B => {
                let result = self.rs_val(f) < self.rt_val(f);
                self.set_register(f.rd, result as u32);
                Ok(())
            }
            _ => Err(Exception::ReservedInstr),
        }
    }

    fn add_checked(&mut self, f: &Fields, _trap: bool) -> Result<(), Exception> {
        match (self.rs_val(f) as i32).checked_add(self.rt_val(f) as i32) {
            Some(result) => {
                self.set_register(f.rd, result as u32);
                Ok(())
            }
            None => Err(Exception::Overflow),
        }
    }

    fn sub_checked(&mut self, f: &Fields) -> Result<(), Exception> {
        match (self.rs_val(f) as i32).checked_sub(self.rt_val(f) as i32) {
            Some(result) => {
                self.set_register(f.rd, result as u32);
                Ok(())
            }
            None => Err(Exception::Overflow),
        }
    }

    /// Division by zero and the `i32::MIN / -1` overflow case both have
    /// documented non-trapping results on the R3000A rather than an
    /// exception.
    fn div_signed(&mut self, f: &Fields) {
        let numerator = self.rs_val(f) as i32;
        let denominator = self.rt_val(f) as i32;

        if denominator == 0 {
            self.regs.lo = if numerator >= 0 { 0xFFFF_FFFF } else { 1 };
            self.regs.hi = numerator as u32;
        } else if numerator == i32::MIN && denominator == -1 {
            self.regs.lo = i32::MIN as u32;
            self.regs.hi = 0;
        } else {
            self.regs.lo = (numerator / denominator) as u32;
            self.regs.hi = (numerator % denominator) as u32;
        }
    }

    fn div_unsigned(&mut self, f: &Fields) {
        let numerator = self.rs_val(f);
        let denominator = self.rt_val(f);

        if denominator == 0 {
            self.regs.lo = 0xFFFF_FFFF;
            self.regs.hi = numerator;
        } else {
            self.regs.lo = numerator / denominator;
            self.regs.hi = numerator % denominator;
        }
    }

    fn jr(&mut self, f: &Fields) -> Result<(), Exception> {
        let target = self.rs_val(f);
        if target & 0x3 != 0 {
            return Err(Exception::StoreAddress);
        }
        self.jump_to_target(target);
        Ok(())
    }

    fn jalr(&mut self, f: &Fields) -> Result<(), Exception> {
        let target = self.rs_val(f);
        if target & 0x3 != 0 {
            return Err(Exception::StoreAddress);
        }
        self.set_register(f.rd, self.regs.pc.wrapping_add(4));
        self.jump_to_target(target);
        Ok(())
    }

    fn effective_address(&self, f: &Fields) -> u32 {
        self.rs_val(f).wrapping_add(sign_extend(f.imm16, 16) as u32)
    }

    fn load(&mut self, f: &Fields, bus: &mut Bus, size: u32, sign_extended: bool) -> Result<(), Exception> {
        let address = self.effective_address(f);
        if address % size != 0 {
            return Err(Exception::LoadAddress);
        }

        if self.cp0.status.isolate_cache {
            unimplemented!("cache-isolated loads read the data cache array, which is not modeled");
        }

        let value = match size {
            1 if sign_extended => sign_extend(u32::from(bus.load8(address)), 8) as u32,
            1 => u32::from(bus.load8(address)),
            2 if sign_extended => sign_extend(u32::from(bus.load16(address)), 16) as u32,
            2 => u32::from(bus.load16(address)),
            4 => bus.load32(address),
            _ => unreachable!("only byte/half/word loads exist"),
        };

        self.delayed_load(f.rt, value);
        Ok(())
    }

    fn store32(&mut self, f: &Fields, bus: &mut Bus) -> Result<(), Exception> {
        let address = self.effective_address(f);
        if address % 4 != 0 {
            return Err(Exception::StoreAddress);
        }
        if self.cp0.status.isolate_cache {
            return Ok(());
        }
        bus.store32(address, self.rt_val(f));
        Ok(())
    }

    fn store16(&mut self, f: &Fields, bus: &mut Bus) -> Result<(), Exception> {
        let address = self.effective_address(f);
        if address % 2 != 0 {
            return Err(Exception::StoreAddress);
        }
        if self.cp0.status.isolate_cache {
            return Ok(());
        }
        bus.store16(address, self.rt_val(f) as u16);
        Ok(())
    }

    fn store8(&mut self, f: &Fields, bus: &mut Bus) -> Result<(), Exception> {
        let address = self.effective_address(f);
        if self.cp0.status.isolate_cache {
            return Ok(());
        }
        bus.store8(address, self.rt_val(f) as u8);
        Ok(())
    }

    fn lwl(&mut self, f: &Fields, bus: &mut Bus) -> Result<(), Exception> {
        let address = self.effective_address(f);
        let aligned_word = bus.load32(address & !0x3);
        let current = self.rt_val(f);

        let result = match address & 0x3 {
            0 => (current & 0x00FF_FFFF) | (aligned_word << 24),
            1 => (current & 0x0000_FFFF) | (aligned_word << 16),
            2 => (current & 0x0000_00FF) | (aligned_word << 8),
            3 => aligned_word,
            _ => unreachable!("masked to 2 bits"),
        };

        self.delayed_load(f.rt, result);
        Ok(())
    }

    fn lwr(&mut self, f: &Fields, bus: &mut Bus) -> Result<(), Exception> {
        let address = self.effective_address(f);
        let aligned_word = bus.load32(address & !0x3);
        let current = self.rt_val(f);

        let result = match address & 0x3 {
            0 => aligned_word,
            1 => (current & 0xFF00_0000) | (aligned_word >> 8),
            2 => (current & 0xFFFF_0000) | (aligned_word >> 16),
            3 => (current & 0xFFFF_FF00) | (aligned_word >> 24),
            _ => unreachable!("masked to 2 bits"),
        };

        self.delayed_load(f.rt, result);
        Ok(())
    }

    fn swl(&mut self, f: &Fields, bus: &mut Bus) -> Result<(), Exception> {
        if self.cp0.status.isolate_cache {
            return Ok(());
        }
        let address = self.effective_address(f);
        let aligned = address & !0x3;
        let mem = bus.load32(aligned);
        let rt = self.rt_val(f);

        let result = match address & 0x3 {
            0 => (mem & 0xFFFF_FF00) | (rt >> 24),
            1 => (mem & 0xFFFF_0000) | (rt >> 16),
            2 => (mem & 0xFF00_0000) | (rt >> 8),
            3 => rt,
            _ => unreachable!("masked to 2 bits"),
        };

        bus.store32(aligned, result);
        Ok(())
    }

    fn swr(&mut self, f: &Fields, bus: &mut Bus) -> Result<(), Exception> {
        if self.cp0.status.isolate_cache {
            return Ok(());
        }
        let address = self.effective_address(f);
        let aligned = address & !0x3;
        let mem = bus.load32(aligned);
        let rt = self.rt_val(f);

        let result = match address & 0x3 {
            0 => rt,
            1 => (mem & 0x0000_00FF) | (rt << 8),
            2 => (mem & 0x0000_FFFF) | (rt << 16),
            3 => (mem & 0x00FF_FFFF) | (rt << 24),
            _ => unreachable!("masked to 2 bits"),
        };

        bus.store32(aligned, result);
        Ok(())
    }

    fn execute_cop0(&mut self, f: &Fields) -> Result<(), Exception> {
        match f.rs {
            0x00 => {
                let value = self.cp0.read_register(u32::from(f.rd));
                self.delayed_load(f.rt, value);
                Ok(())
            }
            0x04 => {
                self.cp0.write_register(u32::from(f.rd), self.rt_val(f));
                Ok(())
            }
            0x10 => {
                self.cp0.execute_operation(f.funct);
                Ok(())
            }
            _ => {
                log::warn!("Unhandled COP0 rs field: {:02X}", f.rs);
                Ok(())
            }
        }
    }

    fn execute_cop2(&mut self, f: &Fields, instruction: u32) -> Result<(), Exception> {
        if instruction.bit(25) {
            self.gte.execute(instruction);
            return Ok(());
        }

        match f.rs {
            0x00 => {
                let value = self.gte.read_data(f.rd);
                self.delayed_load(f.rt, value);
            }
            0x02 => {
                let value = self.gte.read_control(f.rd);
                self.delayed_load(f.rt, value);
            }
            0x04 => self.gte.write_data(f.rd, self.rt_val(f)),
            0x06 => self.gte.write_control(f.rd, self.rt_val(f)),
            _ => log::warn!("Unhandled COP2 rs field: {:02X}", f.rs),
        }
        Ok(())
    }

    fn lwc2(&mut self, f: &Fields, bus: &mut Bus) -> Result<(), Exception> {
        let address = self.effective_address(f);
        if address % 4 != 0 {
            return Err(Exception::LoadAddress);
        }
        let value = bus.load32(address);
        self.gte.write_data(f.rt, value);
        Ok(())
    }

    fn swc2(&mut self, f: &Fields, bus: &mut Bus) -> Result<(), Exception> {
        let address = self.effective_address(f);
        if address % 4 != 0 {
            return Err(Exception::StoreAddress);
        }
        let value = self.gte.read_data(f.rt);
        bus.store32(address, value);
        Ok(())
    }
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

    #[test]
    fn add_overflow_raises_exception_without_writing_rd() {
        let mut harness = Harness::new();
        let mut cpu = Cpu::new();
        cpu.set_register(8, i32::MAX as u32);
        cpu.set_register(9, 1);
        // add $10, $8, $9
        let instruction = 0x0109_5020;
        let result = cpu.execute(instruction, &mut harness.bus());
        assert_eq!(result, Err(Exception::Overflow));
        assert_eq!(cpu.regs.read(10), 0);
    }

    #[test]
    fn addu_wraps_without_exception() {
        let mut harness = Harness::new();
        let mut cpu = Cpu::new();
        cpu.set_register(8, 0xFFFF_FFFF);
        cpu.set_register(9, 1);
        // addu $10, $8, $9
        let instruction = 0x0109_5021;
        cpu.execute(instruction, &mut harness.bus()).unwrap();
        assert_eq!(cpu.regs.read(10), 0);
    }

    #[test]
    fn divide_by_zero_follows_documented_special_case() {
        let mut harness = Harness::new();
        let mut cpu = Cpu::new();
        cpu.set_register(8, 5);
        cpu.set_register(9, 0);
        // div $8, $9
        let instruction = 0x0109_001A;
        cpu.execute(instruction, &mut harness.bus()).unwrap();
        assert_eq!(cpu.regs.lo, 0xFFFF_FFFF);
        assert_eq!(cpu.regs.hi, 5);
    }

    #[test]
    fn lwl_lwr_pair_reconstructs_unaligned_word() {
        let mut harness = Harness::new();
        harness.memory.write_main_ram_u32(0x100, 0x1234_5678);
        let mut cpu = Cpu::new();
        cpu.set_register(8, 0x101); // base, so effective address is 0x101..0x104 spanning word

        // lwl $9, 3($8) -> address 0x104, offset 0 within that word
        let lwl = (0x22 << 26) | (8 << 21) | (9 << 16) | 3u32;
        cpu.execute(lwl, &mut harness.bus()).unwrap();

        // lwr $9, 0($8) -> address 0x101, offset 1
        let lwr = (0x26 << 26) | (8 << 21) | (9 << 16) | 0u32;
        cpu.execute(lwr, &mut harness.bus()).unwrap();

        assert_eq!(cpu.regs.read(9), 0x1234_5678);
    }

    #[test]
    fn jr_to_unaligned_target_raises_store_address() {
        let mut harness = Harness::new();
        let mut cpu = Cpu::new();
        cpu.set_register(8, 0x1001);
        // jr $8
        let instruction = (8u32 << 21) | 0x08;
        let result = cpu.execute(instruction, &mut harness.bus());
        assert_eq!(result, Err(Exception::StoreAddress));
    }
}
