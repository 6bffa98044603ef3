//! SPU MMIO stand-in: reads return zero, writes are ignored.
//!
//! Real sound mixing and ADPCM voice state is explicitly out of scope.

use crate::dma::{Channel, DmaPorts};

#[derive(Debug, Clone, Copy, Default)]
pub struct Spu;

impl Spu {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn read(&self, address: u32) -> u16 {
        log::trace!("SPU register read (ignored): {address:08X}");
        0
    }

    pub fn write(&mut self, address: u32, value: u16) {
        log::trace!("SPU register write (ignored): {address:08X} {value:04X}");
    }
}

impl DmaPorts for Spu {
    fn dma_read(&mut self, channel: Channel) -> u32 {
        debug_assert_eq!(channel, Channel::Spu);
        0
    }

    fn dma_write(&mut self, channel: Channel, _value: u32) {
        debug_assert_eq!(channel, Channel::Spu);
    }
}
