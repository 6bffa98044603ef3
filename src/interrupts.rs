//! Interrupt controller: merges device IRQ lines into the CPU's cause.IP bits
//!
//! Two 11-bit registers. `status` is set by devices via [`InterruptController::request`]
//! and cleared by the CPU (write-and semantics). `mask` gates which status bits
//! propagate to the CPU's external interrupt line.

use crate::num::U16Ext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqSource {
    VBlank,
    Gpu,
    CdRom,
    Dma,
    Timer0,
    Timer1,
    Timer2,
    MemoryCard,
    Sio,
    Spu,
    Controller,
}

impl IrqSource {
    const fn bit(self) -> u16 {
        match self {
            Self::VBlank => 1 << 0,
            Self::Gpu => 1 << 1,
            Self::CdRom => 1 << 2,
            Self::Dma => 1 << 3,
            Self::Timer0 => 1 << 4,
            Self::Timer1 => 1 << 5,
            Self::Timer2 => 1 << 6,
            Self::MemoryCard => 1 << 7,
            Self::Sio => 1 << 8,
            Self::Spu => 1 << 9,
            Self::Controller => 1 << 10,
        }
    }
}

const VALID_BITS: u16 = 0x7FF;

#[derive(Debug, Clone, Default)]
pub struct InterruptController {
    status: u16,
    mask: u16,
}

impl InterruptController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A device raises one of the 11 IRQ lines.
    pub fn request(&mut self, source: IrqSource) {
        self.status |= source.bit();
        log::debug!("IRQ requested: {source:?}, status now {:03X}", self.status);
    }

    #[must_use]
    pub fn read_status(&self) -> u32 {
        self.status.into()
    }

    /// Writing 0 to a bit clears it; writing 1 leaves it unchanged.
    pub fn write_status(&mut self, value: u32) {
        self.status &= value as u16 & VALID_BITS;
    }

    #[must_use]
    pub fn read_mask(&self) -> u32 {
        self.mask.into()
    }

    pub fn write_mask(&mut self, value: u32) {
        self.mask = value as u16 & VALID_BITS;
    }

    /// `true` if any unmasked status bit is set; this is what the CPU
    /// ORs into cause.IP bit 10 every step.
    #[must_use]
    pub fn pending(&self) -> bool {
        self.status & self.mask != 0
    }

    #[must_use]
    pub fn is_set(&self, source: IrqSource) -> bool {
        self.status.bit(source.bit().trailing_zeros() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_irq_does_not_propagate() {
        let mut ic = InterruptController::new();
        ic.request(IrqSource::VBlank);
        assert!(!ic.pending());

        ic.write_mask(1);
        assert!(ic.pending());
    }

    #[test]
    fn status_write_and_clears() {
        let mut ic = InterruptController::new();
        ic.request(IrqSource::Dma);
        ic.request(IrqSource::Timer0);

        // Writing 0 to the DMA bit clears only that bit.
        ic.write_status(!IrqSource::Dma.bit() as u32);
        assert!(!ic.is_set(IrqSource::Dma));
        assert!(ic.is_set(IrqSource::Timer0));
    }
}
