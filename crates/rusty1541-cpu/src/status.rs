//! CPU Status Register (P register) flags.
//!
//! ```text
//! 7  6  5  4  3  2  1  0
//! N  V  U  B  D  I  Z  C
//! │  │  │  │  │  │  │  └─ Carry
//! │  │  │  │  │  │  └──── Zero
//! │  │  │  │  │  └─────── Interrupt Disable
//! │  │  │  │  └────────── Decimal Mode (BCD arithmetic, used by the 1541 ROM)
//! │  │  │  └───────────── Break (1 when pushed from PHP/BRK, 0 from IRQ/NMI)
//! │  │  └──────────────── Unused (always 1)
//! │  └─────────────────── Overflow
//! └────────────────────── Negative
//! ```
//!
//! Two bits carry drive-specific weight. V is double-duty: besides signed
//! overflow, the 1541 wires the disk controller's byte-ready line to the
//! SO pin, so the ROM's read loop spins on BVC with V as the "byte
//! arrived" strobe. And B exists only on the stack: it is forced by the
//! push path and stripped by the pull path, so the live register never
//! carries it.

use bitflags::bitflags;

bitflags! {
    /// CPU Status Register flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Status: u8 {
        /// Carry flag - Set if the last operation carried out of bit 7
        /// or did not borrow into bit 0.
        const C = 1 << 0;

        /// Zero flag - Set if the result of the last operation was zero.
        const Z = 1 << 1;

        /// Interrupt Disable flag - When set, IRQ interrupts are disabled.
        /// NMI interrupts are not affected.
        const I = 1 << 2;

        /// Decimal Mode flag - When set, ADC/SBC use BCD arithmetic.
        const D = 1 << 3;

        /// Break flag - Distinguishes BRK from hardware interrupts.
        /// Set to 1 when pushed by PHP or BRK, 0 when pushed by IRQ or NMI.
        const B = 1 << 4;

        /// Unused flag - Always 1.
        const U = 1 << 5;

        /// Overflow flag - Set if the last operation caused a signed
        /// overflow, or directly by the SO pin (byte-ready in the 1541).
        const V = 1 << 6;

        /// Negative flag - Set if bit 7 of the result is set.
        const N = 1 << 7;
    }
}

impl Status {
    /// Status at power-on: I disabled, U always 1.
    pub const POWER_ON: Self = Self::I.union(Self::U);

    /// Creates a new status register in the power-on state.
    #[must_use]
    pub const fn new() -> Self {
        Self::POWER_ON
    }

    /// True when a held IRQ line may be serviced (I clear).
    #[must_use]
    pub const fn irq_enabled(self) -> bool {
        !self.contains(Self::I)
    }

    /// SO pin strobe: sets V directly, outside instruction flow. The 1541
    /// raises this when the disk controller has a byte ready.
    #[inline]
    pub fn set_overflow_pin(&mut self) {
        self.insert(Self::V);
    }

    /// Sets or clears the Zero and Negative flags from a result value.
    #[inline]
    pub fn set_zn(&mut self, value: u8) {
        self.set(Self::Z, value == 0);
        self.set(Self::N, value & 0x80 != 0);
    }

    /// Converts the register to the byte pushed on the stack.
    /// U is always set; B reflects the push source (PHP/BRK vs IRQ/NMI).
    #[inline]
    #[must_use]
    pub const fn to_stack_byte(self, brk: bool) -> u8 {
        let pushed = if brk {
            self.union(Self::B)
        } else {
            self.difference(Self::B)
        };
        pushed.union(Self::U).bits()
    }

    /// Rebuilds the register from a byte pulled off the stack.
    /// B is stripped and U is forced on.
    #[inline]
    #[must_use]
    pub const fn from_stack_byte(value: u8) -> Self {
        Self::from_bits_truncate(value)
            .difference(Self::B)
            .union(Self::U)
    }
}
