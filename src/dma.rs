//! DMA controller: 7 channels, 3 sync modes
//!
//! Each channel moves words directly between main RAM and a device FIFO.
//! The controller itself does not own device FIFOs; transfers call back
//! into [`DmaPorts`] for the device side of the copy.

use crate::interrupts::{InterruptController, IrqSource};
use crate::num::U32Ext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    MdecIn,
    MdecOut,
    Gpu,
    CdRom,
    Spu,
    Pio,
    Otc,
}

pub const CHANNEL_COUNT: usize = 7;

const CHANNEL_REGISTERS_BASE: u32 = 0x1F80_1080;

#[must_use]
fn channel_index(address: u32) -> usize {
    ((address - CHANNEL_REGISTERS_BASE) >> 4) as usize
}

/// A zero block size means the full 0x10000-word block, per hardware.
#[must_use]
fn word_count_with_sentinel(block_size: u16) -> u32 {
    if block_size == 0 { 0x1_0000 } else { u32::from(block_size) }
}

impl Channel {
    const ALL: [Channel; CHANNEL_COUNT] =
        [Self::MdecIn, Self::MdecOut, Self::Gpu, Self::CdRom, Self::Spu, Self::Pio, Self::Otc];

    #[must_use]
    fn from_index(index: usize) -> Self {
        Self::ALL[index]
    }

    #[must_use]
    fn index(self) -> usize {
        Self::ALL.iter().position(|&c| c == self).unwrap()
    }

    const fn irq_enable_bit(self) -> u32 {
        1 << (16 + self.index())
    }

    const fn irq_flag_bit(self) -> u32 {
        1 << (24 + self.index())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Transfer the whole block in one burst, as soon as triggered.
    Manual,
    /// Transfer fixed-size blocks, gated by the device's DMA request line.
    Request,
    /// Walk a linked list of variable-size blocks (GPU command lists).
    LinkedList,
}

impl SyncMode {
    const fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::Manual,
            1 => Self::Request,
            _ => Self::LinkedList,
        }
    }

    const fn to_bits(self) -> u32 {
        match self {
            Self::Manual => 0,
            Self::Request => 1,
            Self::LinkedList => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToRam,
    FromRam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Forward,
    Backward,
}

/// Per-channel control register (`0x1F80_10N8`), plus the base address and
/// block control registers that make up the rest of a channel's window.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelConfig {
    pub base_address: u32,
    pub block_size: u16,
    pub block_count: u16,
    direction: bool,
    step: bool,
    chopping_enabled: bool,
    sync_mode: u8,
    chop_dma_window: u8,
    chop_cpu_window: u8,
    enabled: bool,
    manual_trigger: bool,
}

impl ChannelConfig {
    #[must_use]
    pub fn direction(&self) -> Direction {
        if self.direction {
            Direction::FromRam
        } else {
            Direction::ToRam
        }
    }

    #[must_use]
    pub fn step(&self) -> Step {
        if self.step {
            Step::Backward
        } else {
            Step::Forward
        }
    }

    #[must_use]
    pub fn sync_mode(&self) -> SyncMode {
        SyncMode::from_bits(u32::from(self.sync_mode))
    }

    #[must_use]
    pub fn active(&self) -> bool {
        self.enabled && (self.sync_mode() == SyncMode::Manual && self.manual_trigger
            || self.sync_mode() != SyncMode::Manual)
    }

    #[must_use]
    pub fn read_control(&self) -> u32 {
        u32::from(self.direction)
            | (u32::from(self.step) << 1)
            | (u32::from(self.chopping_enabled) << 8)
            | (u32::from(self.sync_mode) << 9)
            | (u32::from(self.chop_dma_window) << 16)
            | (u32::from(self.chop_cpu_window) << 20)
            | (u32::from(self.enabled) << 24)
            | (u32::from(self.manual_trigger) << 28)
    }

    pub fn write_control(&mut self, value: u32) {
        self.direction = value.bit(0);
        self.step = value.bit(1);
        self.chopping_enabled = value.bit(8);
        self.sync_mode = ((value >> 9) & 3) as u8;
        self.chop_dma_window = ((value >> 16) & 7) as u8;
        self.chop_cpu_window = ((value >> 20) & 7) as u8;
        self.enabled = value.bit(24);
        self.manual_trigger = value.bit(28);
    }

    #[must_use]
    pub fn read_block_control(&self) -> u32 {
        u32::from(self.block_size) | (u32::from(self.block_count) << 16)
    }

    pub fn write_block_control(&mut self, value: u32) {
        self.block_size = value as u16;
        self.block_count = (value >> 16) as u16;
    }

    fn finish(&mut self) {
        self.enabled = false;
        self.manual_trigger = false;
    }
}

/// Devices the DMA controller moves data to and from. The GPU and CD-ROM
/// stand-ins implement this directly; MDEC/SPU/PIO are unimplemented
/// subsystems so their ports simply discard/yield zero, matching real
/// hardware behavior when nothing is attached.
pub trait DmaPorts {
    fn dma_read(&mut self, channel: Channel) -> u32 {
        let _ = channel;
        0
    }
    fn dma_write(&mut self, channel: Channel, value: u32) {
        let _ = (channel, value);
    }
}

/// Seven-channel DMA controller, including the shared control (DPCR) and
/// interrupt (DICR) registers at `0x1F8010F0`/`0x1F8010F4`.
#[derive(Debug, Clone)]
pub struct DmaController {
    channels: [ChannelConfig; CHANNEL_COUNT],
    control: u32,
    force_irq: bool,
    irq_enable: u32,
    master_enable: bool,
    irq_flags: u32,
}

impl DmaController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: [ChannelConfig::default(); CHANNEL_COUNT],
            control: 0x0765_4321,
            force_irq: false,
            irq_enable: 0,
            master_enable: false,
            irq_flags: 0,
        }
    }

    #[must_use]
    pub fn channel(&self, channel: Channel) -> &ChannelConfig {
        &self.channels[channel.index()]
    }

    #[must_use]
    fn master_irq_bit(&self) -> bool {
        self.force_irq || (self.master_enable && (self.irq_enable & self.irq_flags) != 0)
    }

    #[must_use]
    pub fn read_dicr(&self) -> u32 {
        u32::from(self.force_irq)
            | (self.irq_enable << 16)
            | (u32::from(self.master_enable) << 23)
            | (self.irq_flags << 24)
            | (u32::from(self.master_irq_bit()) << 31)
    }

    pub fn write_dicr(&mut self, value: u32) {
        self.force_irq = value.bit(15);
        self.irq_enable = (value >> 16) & 0x7F;
        self.master_enable = value.bit(23);
        // Bits 24-30 are write-one-to-clear.
        self.irq_flags &= !((value >> 24) & 0x7F);
    }

    #[must_use]
    pub fn read_dpcr(&self) -> u32 {
        self.control
    }

    pub fn write_dpcr(&mut self, value: u32) {
        self.control = value;
    }

    #[must_use]
    pub fn read_register(&self, address: u32) -> u32 {
        match address {
            0x1F80_10F0 => self.read_dpcr(),
            0x1F80_10F4 => self.read_dicr(),
            _ => {
                let index = channel_index(address);
                if index >= CHANNEL_COUNT {
                    log::warn!("Out-of-range DMA channel register read: {address:08X}");
                    return 0xFFFF_FFFF;
                }
                let channel = &self.channels[index];
                match address & 0xF {
                    0x0 => channel.base_address,
                    0x4 => channel.read_block_control(),
                    0x8 => channel.read_control(),
                    _ => {
                        log::warn!("Unhandled DMA register read: {address:08X}");
                        0
                    }
                }
            }
        }
    }

    pub fn write_register(&mut self, address: u32, value: u32, interrupts: &mut InterruptController) {
        match address {
            0x1F80_10F0 => self.write_dpcr(value),
            0x1F80_10F4 => {
                self.write_dicr(value);
                self.update_irq_line(interrupts);
            }
            _ => {
                let index = channel_index(address);
                if index >= CHANNEL_COUNT {
                    log::warn!("Out-of-range DMA channel register write: {address:08X} {value:08X}");
                    return;
                }
                let channel = &mut self.channels[index];
                match address & 0xF {
                    0x0 => channel.base_address = value & 0x00FF_FFFF,
                    0x4 => channel.write_block_control(value),
                    0x8 => channel.write_control(value),
                    _ => log::warn!("Unhandled DMA register write: {address:08X} {value:08X}"),
                }
            }
        }
    }

    fn update_irq_line(&self, interrupts: &mut InterruptController) {
        if self.master_irq_bit() {
            interrupts.request(IrqSource::Dma);
        }
    }

    fn request_channel_irq(&mut self, channel: Channel, interrupts: &mut InterruptController) {
        let was_pending = self.master_irq_bit();
        self.irq_flags |= 1 << channel.index();
        if !was_pending && self.master_irq_bit() {
            interrupts.request(IrqSource::Dma);
        }
    }

    /// Cycle cost of transferring `words` through `channel`, per the
    /// documented per-channel bus contention formulas.
    #[must_use]
    pub fn transfer_cost(channel: Channel, words: u32) -> u32 {
        let numerator = match channel {
            Channel::CdRom => 0x2800,
            Channel::Spu => 0x0420,
            _ => 0x0110,
        };
        words * numerator / 0x100
    }

    /// Run any channel whose control register marks it active, charging
    /// the resulting cycle cost to `scheduler_cycles` (an out-parameter
    /// the caller accumulates and later feeds to the scheduler).
    pub fn run(
        &mut self,
        ram: &mut crate::memory::Memory,
        ports: &mut dyn DmaPorts,
        interrupts: &mut InterruptController,
        scheduler_cycles: &mut u32,
    ) {
        for i in 0..CHANNEL_COUNT {
            let channel = Channel::from_index(i);
            if self.channels[i].active() {
                let words = self.run_channel(channel, ram, ports);
                *scheduler_cycles += Self::transfer_cost(channel, words);
                self.request_channel_irq(channel, interrupts);
                self.update_irq_line(interrupts);
            }
        }
    }

    fn run_channel(
        &mut self,
        channel: Channel,
        ram: &mut crate::memory::Memory,
        ports: &mut dyn DmaPorts,
    ) -> u32 {
        if channel == Channel::Otc {
            return self.run_otc(ram);
        }

        match self.channels[channel.index()].sync_mode() {
            SyncMode::Manual => self.run_manual(channel, ram, ports),
            SyncMode::Request => self.run_request(channel, ram, ports),
            SyncMode::LinkedList => self.run_linked_list(channel, ram, ports),
        }
    }

    fn run_manual(&mut self, channel: Channel, ram: &mut crate::memory::Memory, ports: &mut dyn DmaPorts) -> u32 {
        let config = &mut self.channels[channel.index()];
        let words = word_count_with_sentinel(config.block_size);
        let step: i32 = if config.step() == Step::Backward { -4 } else { 4 };
        let mut address = config.base_address;

        for _ in 0..words {
            transfer_one_word(config.direction(), address, ram, channel, ports);
            address = address.wrapping_add(step as u32);
        }

        config.finish();
        words
    }

    fn run_request(&mut self, channel: Channel, ram: &mut crate::memory::Memory, ports: &mut dyn DmaPorts) -> u32 {
        let config = &mut self.channels[channel.index()];
        let total_words = u32::from(config.block_size) * u32::from(config.block_count);
        let step: i32 = if config.step() == Step::Backward { -4 } else { 4 };
        let mut address = config.base_address;

        for _ in 0..total_words {
            transfer_one_word(config.direction(), address, ram, channel, ports);
            address = address.wrapping_add(step as u32);
        }

        config.finish();
        total_words
    }

    fn run_linked_list(&mut self, channel: Channel, ram: &mut crate::memory::Memory, ports: &mut dyn DmaPorts) -> u32 {
        let mut address = self.channels[channel.index()].base_address & 0x00FF_FFFC;
        let mut total_words = 0;

        loop {
            let header = ram.read_main_ram_u32(address);
            let word_count = header >> 24;
            let next = header & 0x00FF_FFFF;

            let mut payload_addr = address.wrapping_add(4);
            for _ in 0..word_count {
                let word = ram.read_main_ram_u32(payload_addr);
                ports.dma_write(channel, word);
                payload_addr = payload_addr.wrapping_add(4);
                total_words += 1;
            }

            if next & 0x0080_0000 != 0 {
                break;
            }
            address = next & 0x00FF_FFFC;
        }

        self.channels[channel.index()].finish();
        total_words
    }

    /// OTC (ordering table clear): writes a backward-linked list into RAM,
    /// each entry pointing to the previous address, terminated by
    /// `0x00FF_FFFF`. Direction and step bits are ignored; OTC always runs
    /// backward from RAM to RAM.
    fn run_otc(&mut self, ram: &mut crate::memory::Memory) -> u32 {
        let config = &mut self.channels[Channel::Otc.index()];
        let entries = word_count_with_sentinel(config.block_size);
        let mut address = config.base_address & 0x00FF_FFFC;

        for i in 0..entries {
            let value = if i == entries - 1 { 0x00FF_FFFF } else { address.wrapping_sub(4) & 0x001F_FFFF };
            ram.write_main_ram_u32(address, value);
            address = address.wrapping_sub(4);
        }

        config.finish();
        entries
    }
}

fn transfer_one_word(
    direction: Direction,
    address: u32,
    ram: &mut crate::memory::Memory,
    channel: Channel,
    ports: &mut dyn DmaPorts,
) {
    match direction {
        Direction::ToRam => {
            let value = ports.dma_read(channel);
            ram.write_main_ram_u32(address, value);
        }
        Direction::FromRam => {
            let value = ram.read_main_ram_u32(address);
            ports.dma_write(channel, value);
        }
    }
}

impl Default for DmaController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;

    struct NullPorts;
    impl DmaPorts for NullPorts {}

    #[test]
    fn otc_clear_builds_backward_linked_list() {
        let mut ram = Memory::new(vec![0; crate::memory::BIOS_ROM_LEN]).unwrap();
        let mut dma = DmaController::new();
        let mut interrupts = InterruptController::new();
        let mut ports = NullPorts;
        let mut cycles = 0;

        let otc_base = 0x1F80_10E0;
        dma.write_register(otc_base, 0x40, &mut interrupts);
        dma.write_register(otc_base + 0x4, 4, &mut interrupts); // 4 entries
        dma.write_register(otc_base + 0x8, (1 << 24) | (1 << 28) | (1 << 1), &mut interrupts); // enabled, triggered, backward step

        dma.run(&mut ram, &mut ports, &mut interrupts, &mut cycles);

        assert_eq!(ram.read_main_ram_u32(0x40), 0x3C);
        assert_eq!(ram.read_main_ram_u32(0x3C), 0x38);
        assert_eq!(ram.read_main_ram_u32(0x38), 0x34);
        assert_eq!(ram.read_main_ram_u32(0x34), 0x00FF_FFFF);
    }

    #[test]
    fn transfer_cost_matches_per_channel_formulas() {
        assert_eq!(DmaController::transfer_cost(Channel::CdRom, 0x100), 0x2800);
        assert_eq!(DmaController::transfer_cost(Channel::Spu, 0x100), 0x0420);
        assert_eq!(DmaController::transfer_cost(Channel::Gpu, 0x100), 0x0110);
    }

    #[test]
    fn dicr_write_one_clears_flag_bits() {
        let mut dma = DmaController::new();
        let mut interrupts = InterruptController::new();

        dma.request_channel_irq(Channel::Gpu, &mut interrupts);
        assert_ne!(dma.read_dicr() & (1 << (24 + Channel::Gpu.index())), 0);

        dma.write_dicr(1 << (24 + Channel::Gpu.index()));
        assert_eq!(dma.read_dicr() & (1 << (24 + Channel::Gpu.index())), 0);
    }
}
