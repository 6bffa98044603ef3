//! Address-space router
//!
//! `Bus<'a>` borrows every component for the duration of a single CPU
//! step; it owns nothing itself. The system context assembles a fresh
//! `Bus` each time it drives the CPU, which sidesteps the cyclic
//! ownership that a permanently wired graph of components would need.

use crate::cd::CdRom;
use crate::dma::{Channel, DmaController, DmaPorts};
use crate::error::BusError;
use crate::gpu::Gpu;
use crate::interrupts::InterruptController;
use crate::joypad::Joypad;
use crate::memory::Memory;
use crate::scheduler::{Scheduler, SchedulerComponent};
use crate::spu::Spu;
use crate::timers::{TimersEventSource, Timers};

/// Masks the top three address bits to collapse KUSEG/KSEG0/KSEG1 onto
/// physical addresses; KSEG2 (index 6/7, `0xC0000000..`) passes through
/// untouched so cache-control accesses still resolve.
const REGION_MASKS: [u32; 8] = [
    0xFFFF_FFFF,
    0xFFFF_FFFF,
    0xFFFF_FFFF,
    0xFFFF_FFFF,
    0x7FFF_FFFF,
    0x1FFF_FFFF,
    0xFFFF_FFFF,
    0xFFFF_FFFF,
];

#[must_use]
pub fn mask_region(address: u32) -> u32 {
    address & REGION_MASKS[(address >> 29) as usize]
}

const RAM_START: u32 = 0x0000_0000;
const RAM_END: u32 = 0x0020_0000;
const SCRATCHPAD_START: u32 = 0x1F80_0000;
const SCRATCHPAD_END: u32 = 0x1F80_0400;
const IO_START: u32 = 0x1F80_1000;
const IO_END: u32 = 0x1F80_3000;
const BIOS_START: u32 = 0x1FC0_0000;
const BIOS_END: u32 = 0x1FC8_0000;
const CACHE_CONTROL_START: u32 = 0xFFFE_0000;
const CACHE_CONTROL_END: u32 = 0xFFFE_0200;
const EXPANSION1_START: u32 = 0x1F00_0000;
const EXPANSION1_END: u32 = 0x1F08_0000;
const EXPANSION2_START: u32 = 0x1F80_2000;
const EXPANSION2_END: u32 = 0x1F80_2080;
const EXPANSION3_START: u32 = 0x1FA0_0000;
const EXPANSION3_END: u32 = 0x1FA0_0200;

pub struct Bus<'a> {
    pub memory: &'a mut Memory,
    pub dma: &'a mut DmaController,
    pub interrupts: &'a mut InterruptController,
    pub timers: &'a mut Timers,
    pub scheduler: &'a mut Scheduler,
    pub gpu: &'a mut Gpu,
    pub cd: &'a mut CdRom,
    pub spu: &'a mut Spu,
    pub joypad: &'a mut Joypad,
}

impl<'a> Bus<'a> {
    #[must_use]
    pub fn load32(&mut self, address: u32) -> u32 {
        let address = mask_region(address);

        if in_range(address, RAM_START, RAM_END) {
            self.memory.read_main_ram_u32(address)
        } else if in_range(address, SCRATCHPAD_START, SCRATCHPAD_END) {
            self.memory.read_scratchpad_u32(address - SCRATCHPAD_START)
        } else if in_range(address, IO_START, IO_END) {
            self.io_read32(address)
        } else if in_range(address, BIOS_START, BIOS_END) {
            self.memory.read_bios_u32(address - BIOS_START)
        } else if in_range(address, CACHE_CONTROL_START, CACHE_CONTROL_END) {
            0
        } else if in_range(address, EXPANSION1_START, EXPANSION1_END) {
            0xFFFF_FFFF
        } else if in_range(address, EXPANSION2_START, EXPANSION2_END) {
            log::warn!("32-bit read from expansion region 2: {address:08X}");
            0xFFFF_FFFF
        } else if in_range(address, EXPANSION3_START, EXPANSION3_END) {
            log::warn!("32-bit read from expansion region 3: {address:08X}");
            0xFFFF_FFFF
        } else {
            panic!("{}", BusError { address });
        }
    }

    #[must_use]
    pub fn load16(&mut self, address: u32) -> u16 {
        let address = mask_region(address);

        if in_range(address, RAM_START, RAM_END) {
            self.memory.read_main_ram_u16(address)
        } else if in_range(address, SCRATCHPAD_START, SCRATCHPAD_END) {
            self.memory.read_scratchpad_u16(address - SCRATCHPAD_START)
        } else if in_range(address, IO_START, IO_END) {
            self.io_read16(address)
        } else if in_range(address, BIOS_START, BIOS_END) {
            self.memory.read_bios_u16(address - BIOS_START)
        } else if in_range(address, CACHE_CONTROL_START, CACHE_CONTROL_END) {
            0
        } else if in_range(address, EXPANSION1_START, EXPANSION1_END) {
            0xFFFF
        } else {
            panic!("{}", BusError { address });
        }
    }

    #[must_use]
    pub fn load8(&mut self, address: u32) -> u8 {
        let address = mask_region(address);

        if in_range(address, RAM_START, RAM_END) {
            self.memory.read_main_ram_u8(address)
        } else if in_range(address, SCRATCHPAD_START, SCRATCHPAD_END) {
            self.memory.read_scratchpad_u8(address - SCRATCHPAD_START)
        } else if in_range(address, IO_START, IO_END) {
            self.io_read8(address)
        } else if in_range(address, BIOS_START, BIOS_END) {
            self.memory.read_bios_u8(address - BIOS_START)
        } else if in_range(address, CACHE_CONTROL_START, CACHE_CONTROL_END) {
            0
        } else if in_range(address, EXPANSION1_START, EXPANSION1_END) {
            0xFF
        } else {
            panic!("{}", BusError { address });
        }
    }

    pub fn store32(&mut self, address: u32, value: u32) {
        let address = mask_region(address);

        if in_range(address, RAM_START, RAM_END) {
            self.memory.write_main_ram_u32(address, value);
        } else if in_range(address, SCRATCHPAD_START, SCRATCHPAD_END) {
            self.memory.write_scratchpad_u32(address - SCRATCHPAD_START, value);
        } else if in_range(address, IO_START, IO_END) {
            self.io_write32(address, value);
        } else if in_range(address, BIOS_START, BIOS_END) {
            log::warn!("Write to BIOS ROM ignored: {address:08X}");
        } else if in_range(address, CACHE_CONTROL_START, CACHE_CONTROL_END) {
            // Cache control is handled by the CPU directly; nothing lives here.
        } else if in_range(address, EXPANSION1_START, EXPANSION1_END)
            || in_range(address, EXPANSION2_START, EXPANSION2_END)
            || in_range(address, EXPANSION3_START, EXPANSION3_END)
        {
            log::warn!("32-bit write to expansion region: {address:08X} = {value:08X}");
        } else {
            panic!("{}", BusError { address });
        }
    }

    pub fn store16(&mut self, address: u32, value: u16) {
        let address = mask_region(address);

        if in_range(address, RAM_START, RAM_END) {
            self.memory.write_main_ram_u16(address, value);
        } else if in_range(address, SCRATCHPAD_START, SCRATCHPAD_END) {
            self.memory.write_scratchpad_u16(address - SCRATCHPAD_START, value);
        } else if in_range(address, IO_START, IO_END) {
            self.io_write16(address, value);
        } else if in_range(address, CACHE_CONTROL_START, CACHE_CONTROL_END) {
        } else if in_range(address, EXPANSION1_START, EXPANSION1_END) {
            log::warn!("16-bit write to expansion region 1: {address:08X} = {value:04X}");
        } else {
            panic!("{}", BusError { address });
        }
    }

    pub fn store8(&mut self, address: u32, value: u8) {
        let address = mask_region(address);

        if in_range(address, RAM_START, RAM_END) {
            self.memory.write_main_ram_u8(address, value);
        } else if in_range(address, SCRATCHPAD_START, SCRATCHPAD_END) {
            self.memory.write_scratchpad_u8(address - SCRATCHPAD_START, value);
        } else if in_range(address, IO_START, IO_END) {
            self.io_write8(address, value);
        } else if in_range(address, CACHE_CONTROL_START, CACHE_CONTROL_END) {
        } else if in_range(address, EXPANSION1_START, EXPANSION1_END) {
            log::warn!("8-bit write to expansion region 1: {address:08X} = {value:02X}");
        } else {
            panic!("{}", BusError { address });
        }
    }

    /// Side-effect-free byte peek for debuggers; does not run IO handlers
    /// that have read side effects (FIFOs), it reads their idle value.
    #[must_use]
    pub fn peek(&self, address: u32) -> u8 {
        let address = mask_region(address);

        if in_range(address, RAM_START, RAM_END) {
            self.memory.read_main_ram_u8(address)
        } else if in_range(address, SCRATCHPAD_START, SCRATCHPAD_END) {
            self.memory.read_scratchpad_u8(address - SCRATCHPAD_START)
        } else if in_range(address, BIOS_START, BIOS_END) {
            self.memory.read_bios_u8(address - BIOS_START)
        } else if in_range(address, 0x1F80_1800, 0x1F80_1804) {
            self.cd.peek(address)
        } else {
            0
        }
    }

    fn io_read32(&mut self, address: u32) -> u32 {
        self.force_scheduler_update();
        match address {
            0x1F80_1070 => self.interrupts.read_status(),
            0x1F80_1074 => self.interrupts.read_mask(),
            0x1F80_1080..=0x1F80_10FF => self.dma.read_register(address),
            0x1F80_1100..=0x1F80_112F => self.timers.read_register(address),
            0x1F80_1810 => self.gpu.gpu_read(),
            0x1F80_1814 => self.gpu.read_stat(),
            0x1F80_1C00..=0x1F80_1E7F => 0,
            0x1F80_1040..=0x1F80_104F => self.joypad.read(address),
            _ => {
                log::warn!("Unhandled 32-bit IO read: {address:08X}");
                0
            }
        }
    }

    fn io_read16(&mut self, address: u32) -> u16 {
        self.force_scheduler_update();
        match address {
            0x1F80_1070 => self.interrupts.read_status() as u16,
            0x1F80_1074 => self.interrupts.read_mask() as u16,
            0x1F80_1100..=0x1F80_112F => self.timers.read_register(address) as u16,
            0x1F80_1C00..=0x1F80_1E7F => 0,
            0x1F80_1040..=0x1F80_104F => self.joypad.read(address) as u16,
            _ => (self.io_read32(address & !3) >> ((address & 2) * 8)) as u16,
        }
    }

    fn io_read8(&mut self, address: u32) -> u8 {
        match address {
            0x1F80_1800..=0x1F80_1803 => self.cd.load(address),
            0x1F80_1C00..=0x1F80_1E7F => 0,
            _ => (self.io_read32(address & !3) >> ((address & 3) * 8)) as u8,
        }
    }

    fn io_write32(&mut self, address: u32, value: u32) {
        match address {
            0x1F80_1070 => self.interrupts.write_status(value),
            0x1F80_1074 => self.interrupts.write_mask(value),
            0x1F80_1080..=0x1F80_10FF => {
                self.dma.write_register(address, value, self.interrupts);
                self.run_dma();
            }
            0x1F80_1100..=0x1F80_112F => {
                self.force_scheduler_update();
                self.timers.write_register(address, value);
                self.recalculate_scheduler();
            }
            0x1F80_1810 => self.gpu.send_gp0(value),
            0x1F80_1814 => self.gpu.send_gp1(value),
            0x1F80_1C00..=0x1F80_1E7F => {}
            0x1F80_1040..=0x1F80_104F => self.joypad.write(address, value),
            _ => log::warn!("Unhandled 32-bit IO write: {address:08X} = {value:08X}"),
        }
    }

    fn io_write16(&mut self, address: u32, value: u16) {
        match address {
            0x1F80_1070 => self.interrupts.write_status(value.into()),
            0x1F80_1074 => self.interrupts.write_mask(value.into()),
            0x1F80_1100..=0x1F80_112F => {
                self.force_scheduler_update();
                self.timers.write_register(address, value.into());
                self.recalculate_scheduler();
            }
            0x1F80_1C00..=0x1F80_1E7F => self.spu.write(address, value),
            _ => log::warn!("Unhandled 16-bit IO write: {address:08X} = {value:04X}"),
        }
    }

    fn io_write8(&mut self, address: u32, value: u8) {
        match address {
            0x1F80_1800..=0x1F80_1803 => self.cd.store(address, value),
            0x1F80_1C00..=0x1F80_1E7F => {}
            _ => log::warn!("Unhandled 8-bit IO write: {address:08X} = {value:02X}"),
        }
    }

    fn run_dma(&mut self) {
        struct BusDmaPorts<'b> {
            gpu: &'b mut Gpu,
            spu: &'b mut Spu,
        }
        impl DmaPorts for BusDmaPorts<'_> {
            fn dma_read(&mut self, channel: Channel) -> u32 {
                match channel {
                    Channel::Gpu => self.gpu.gpu_read(),
                    _ => 0,
                }
            }
            fn dma_write(&mut self, channel: Channel, value: u32) {
                match channel {
                    Channel::Gpu => self.gpu.send_gp0(value),
                    Channel::Spu => self.spu.write(0x1F80_1C00, value as u16),
                    _ => {}
                }
            }
        }

        let mut ports = BusDmaPorts { gpu: &mut *self.gpu, spu: &mut *self.spu };
        let mut cycles = 0;
        self.dma.run(self.memory, &mut ports, self.interrupts, &mut cycles);

        // DMA's bus-contention cost is charged directly to the
        // accumulator rather than flowing through the per-component
        // cycles_until_next_event bound.
        let mut timers_source =
            TimersEventSource { timers: &mut *self.timers, interrupts: &mut *self.interrupts };
        let mut components: Vec<&mut dyn SchedulerComponent> =
            vec![&mut *self.gpu, &mut timers_source];
        self.scheduler.add_cycles(cycles, &mut components);
    }

    /// Charge the fixed per-instruction cost (§4.1 step 8) to the scheduler.
    pub fn charge_cycles(&mut self, cycles: u32) {
        let mut timers_source =
            TimersEventSource { timers: &mut *self.timers, interrupts: &mut *self.interrupts };
        let mut components: Vec<&mut dyn SchedulerComponent> =
            vec![&mut *self.gpu, &mut timers_source];
        self.scheduler.add_cycles(cycles, &mut components);
    }

    fn force_scheduler_update(&mut self) {
        let mut timers_source =
            TimersEventSource { timers: &mut *self.timers, interrupts: &mut *self.interrupts };
        let mut components: Vec<&mut dyn SchedulerComponent> =
            vec![&mut *self.gpu, &mut timers_source];
        self.scheduler.force_update(&mut components);
    }

    fn recalculate_scheduler(&mut self) {
        let mut timers_source =
            TimersEventSource { timers: &mut *self.timers, interrupts: &mut *self.interrupts };
        let mut components: Vec<&mut dyn SchedulerComponent> =
            vec![&mut *self.gpu, &mut timers_source];
        self.scheduler.recalculate_next_event(&mut components);
    }
}

#[must_use]
fn in_range(address: u32, start: u32, end: u32) -> bool {
    address >= start && address < end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kseg0_and_kseg1_collapse_to_same_physical_ram() {
        assert_eq!(mask_region(0x8000_1000), 0x0000_1000);
        assert_eq!(mask_region(0xA000_1000), 0x0000_1000);
        assert_eq!(mask_region(0x0000_1000), 0x0000_1000);
    }

    #[test]
    fn kseg2_is_unmasked() {
        assert_eq!(mask_region(0xFFFE_0130), 0xFFFE_0130);
    }
}
