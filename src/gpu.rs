//! Minimal GPU stand-in
//!
//! Tracks just enough of GP0/GP1/GPUSTAT to give the BUS, DMA, and
//! scheduler a real collaborator. There is no rasterizer here: GP0
//! command words are not decoded into draw commands, and GPUREAD never
//! returns anything but the last value latched by a VRAM-to-CPU transfer
//! request (which this stand-in never actually produces).

use proc_bitfield::bitfield;

use crate::dma::{Channel, DmaPorts};
use crate::scheduler::SchedulerComponent;

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct GpuStat(u32): Debug, IntoRaw {
        pub texture_page_x_base: u8 @ 0..=3,
        pub texture_page_y_base: bool @ 4,
        pub dma_direction: u8 @ 29..=30,
        pub display_disabled: bool @ 23,
        pub vblank: bool @ 31,
        pub ready_to_receive_cmd: bool @ 26,
        pub ready_to_send_vram: bool @ 27,
        pub ready_to_receive_dma: bool @ 28,
    }
}

impl Default for GpuStat {
    fn default() -> Self {
        Self(0x1C00_0000)
    }
}

/// Cycles of a 53.222MHz GPU dot clock per NTSC scanline, used only to give
/// the stand-in a plausible vblank cadence; not bit-accurate video timing.
const CYCLES_PER_SCANLINE: u32 = 3413;
const SCANLINES_PER_FRAME: u32 = 263;

#[derive(Debug, Clone)]
pub struct Gpu {
    stat: GpuStat,
    gpuread: u32,
    pub draw_frame: bool,
    scanline: u32,
    dot_cycles: u32,
}

impl Gpu {
    #[must_use]
    pub fn new() -> Self {
        Self { stat: GpuStat::default(), gpuread: 0, draw_frame: false, scanline: 0, dot_cycles: 0 }
    }

    pub fn send_gp0(&mut self, word: u32) {
        log::trace!("GP0 command word: {word:08X}");
    }

    pub fn send_gp1(&mut self, word: u32) {
        log::trace!("GP1 control word: {word:08X}");
        if word >> 24 == 0 {
            // Reset command.
            self.stat = GpuStat::default();
        }
    }

    #[must_use]
    pub fn read_stat(&self) -> u32 {
        self.stat.into()
    }

    #[must_use]
    pub fn gpu_read(&self) -> u32 {
        self.gpuread
    }
}

impl DmaPorts for Gpu {
    fn dma_read(&mut self, channel: Channel) -> u32 {
        debug_assert_eq!(channel, Channel::Gpu);
        self.gpuread
    }

    fn dma_write(&mut self, channel: Channel, value: u32) {
        debug_assert_eq!(channel, Channel::Gpu);
        self.send_gp0(value);
    }
}

impl SchedulerComponent for Gpu {
    fn update(&mut self, cycles: u32) {
        self.dot_cycles += cycles;
        while self.dot_cycles >= CYCLES_PER_SCANLINE {
            self.dot_cycles -= CYCLES_PER_SCANLINE;
            self.scanline += 1;
            if self.scanline >= SCANLINES_PER_FRAME {
                self.scanline = 0;
                self.draw_frame = true;
            }
            self.stat.set_vblank(self.scanline >= 240);
        }
    }

    fn cycles_until_next_event(&self) -> u32 {
        CYCLES_PER_SCANLINE - self.dot_cycles
    }
}

impl Default for Gpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_command_clears_stat() {
        let mut gpu = Gpu::new();
        gpu.send_gp1(0x0200_0000);
        gpu.send_gp1(0x0000_0000);
        assert_eq!(gpu.read_stat(), 0x1C00_0000);
    }

    #[test]
    fn full_frame_of_scanlines_sets_draw_frame() {
        let mut gpu = Gpu::new();
        gpu.update(CYCLES_PER_SCANLINE * SCANLINES_PER_FRAME);
        assert!(gpu.draw_frame);
    }
}
