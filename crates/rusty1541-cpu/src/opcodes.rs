//! Opcode definitions and the opcode lookup table.
//!
//! All 256 encodings are defined: the 151 documented instructions plus the
//! stable undocumented set the 1541 ROM and copy-protection loaders lean on
//! (ANC, ASR, ARR, LAX, LAS, SAX, SBX, SHA/SHX/SHY, SHS, DCP, ISB, SLO,
//! RLA, SRE, RRA, XAA, LXA, and the JAM group).

/// Magic constant ORed into A by the unstable XAA/LXA opcodes.
///
/// The value is die-dependent; 0xEE is what 1541 drive CPUs measure. Retune
/// here for other NMOS targets without touching the opcode logic.
pub const UNSTABLE_MAGIC: u8 = 0xEE;

/// Bus access pattern of an operation once its effective address is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Reads the operand, then operates on registers/flags.
    Read,
    /// Computes a value and writes it (STA, SAX, SHA, ...).
    Write,
    /// Read, dummy write-back of the old value, write of the result.
    Rmw,
}

/// Operation selector: what an opcode does once its addressing mode has
/// delivered the operand. Undocumented operations use the common mnemonics
/// (ASR is also known as ALR, ISB as ISC, SBX as AXS, SHS as TAS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)] // the variants are the 6502 mnemonics
pub enum Op {
    Adc, Anc, And, Arr, Asl, Asr, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk,
    Bvc, Bvs, Clc, Cld, Cli, Clv, Cmp, Cpx, Cpy, Dcp, Dec, Dex, Dey, Eor,
    Inc, Inx, Iny, Isb, Jam, Jmp, Jsr, Las, Lax, Lda, Ldx, Ldy, Lsr, Lxa,
    Nop, Ora, Pha, Php, Pla, Plp, Rla, Rol, Ror, Rra, Rti, Rts, Sax, Sbc,
    Sbx, Sec, Sed, Sei, Sha, Shs, Shx, Shy, Slo, Sre, Sta, Stx, Sty, Tax,
    Tay, Tsx, Txa, Txs, Tya, Xaa,
}

impl Op {
    /// Bus access pattern of this operation when it targets memory.
    ///
    /// Only consulted after an effective address has been resolved, so the
    /// accumulator and implied forms of the shift group never reach it.
    #[must_use]
    pub const fn kind(self) -> Kind {
        match self {
            Self::Sta | Self::Stx | Self::Sty | Self::Sax | Self::Sha | Self::Shx | Self::Shy
            | Self::Shs => Kind::Write,
            Self::Asl | Self::Lsr | Self::Rol | Self::Ror | Self::Inc | Self::Dec | Self::Slo
            | Self::Rla | Self::Sre | Self::Rra | Self::Dcp | Self::Isb => Kind::Rmw,
            _ => Kind::Read,
        }
    }

    /// True for the eight conditional branch operations.
    #[must_use]
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Self::Bcc | Self::Bcs | Self::Beq | Self::Bmi | Self::Bne | Self::Bpl | Self::Bvc
                | Self::Bvs
        )
    }
}

/// Operation lookup table. Indexed by opcode byte (0x00-0xFF).
#[rustfmt::skip]
pub static OP_TABLE: [Op; 256] = [
    //       0        1        2        3        4        5        6        7        8        9        A        B        C        D        E        F
    /* 0 */ Op::Brk, Op::Ora, Op::Jam, Op::Slo, Op::Nop, Op::Ora, Op::Asl, Op::Slo, Op::Php, Op::Ora, Op::Asl, Op::Anc, Op::Nop, Op::Ora, Op::Asl, Op::Slo,
    /* 1 */ Op::Bpl, Op::Ora, Op::Jam, Op::Slo, Op::Nop, Op::Ora, Op::Asl, Op::Slo, Op::Clc, Op::Ora, Op::Nop, Op::Slo, Op::Nop, Op::Ora, Op::Asl, Op::Slo,
    /* 2 */ Op::Jsr, Op::And, Op::Jam, Op::Rla, Op::Bit, Op::And, Op::Rol, Op::Rla, Op::Plp, Op::And, Op::Rol, Op::Anc, Op::Bit, Op::And, Op::Rol, Op::Rla,
    /* 3 */ Op::Bmi, Op::And, Op::Jam, Op::Rla, Op::Nop, Op::And, Op::Rol, Op::Rla, Op::Sec, Op::And, Op::Nop, Op::Rla, Op::Nop, Op::And, Op::Rol, Op::Rla,
    /* 4 */ Op::Rti, Op::Eor, Op::Jam, Op::Sre, Op::Nop, Op::Eor, Op::Lsr, Op::Sre, Op::Pha, Op::Eor, Op::Lsr, Op::Asr, Op::Jmp, Op::Eor, Op::Lsr, Op::Sre,
    /* 5 */ Op::Bvc, Op::Eor, Op::Jam, Op::Sre, Op::Nop, Op::Eor, Op::Lsr, Op::Sre, Op::Cli, Op::Eor, Op::Nop, Op::Sre, Op::Nop, Op::Eor, Op::Lsr, Op::Sre,
    /* 6 */ Op::Rts, Op::Adc, Op::Jam, Op::Rra, Op::Nop, Op::Adc, Op::Ror, Op::Rra, Op::Pla, Op::Adc, Op::Ror, Op::Arr, Op::Jmp, Op::Adc, Op::Ror, Op::Rra,
    /* 7 */ Op::Bvs, Op::Adc, Op::Jam, Op::Rra, Op::Nop, Op::Adc, Op::Ror, Op::Rra, Op::Sei, Op::Adc, Op::Nop, Op::Rra, Op::Nop, Op::Adc, Op::Ror, Op::Rra,
    /* 8 */ Op::Nop, Op::Sta, Op::Nop, Op::Sax, Op::Sty, Op::Sta, Op::Stx, Op::Sax, Op::Dey, Op::Nop, Op::Txa, Op::Xaa, Op::Sty, Op::Sta, Op::Stx, Op::Sax,
    /* 9 */ Op::Bcc, Op::Sta, Op::Jam, Op::Sha, Op::Sty, Op::Sta, Op::Stx, Op::Sax, Op::Tya, Op::Sta, Op::Txs, Op::Shs, Op::Shy, Op::Sta, Op::Shx, Op::Sha,
    /* A */ Op::Ldy, Op::Lda, Op::Ldx, Op::Lax, Op::Ldy, Op::Lda, Op::Ldx, Op::Lax, Op::Tay, Op::Lda, Op::Tax, Op::Lxa, Op::Ldy, Op::Lda, Op::Ldx, Op::Lax,
    /* B */ Op::Bcs, Op::Lda, Op::Jam, Op::Lax, Op::Ldy, Op::Lda, Op::Ldx, Op::Lax, Op::Clv, Op::Lda, Op::Tsx, Op::Las, Op::Ldy, Op::Lda, Op::Ldx, Op::Lax,
    /* C */ Op::Cpy, Op::Cmp, Op::Nop, Op::Dcp, Op::Cpy, Op::Cmp, Op::Dec, Op::Dcp, Op::Iny, Op::Cmp, Op::Dex, Op::Sbx, Op::Cpy, Op::Cmp, Op::Dec, Op::Dcp,
    /* D */ Op::Bne, Op::Cmp, Op::Jam, Op::Dcp, Op::Nop, Op::Cmp, Op::Dec, Op::Dcp, Op::Cld, Op::Cmp, Op::Nop, Op::Dcp, Op::Nop, Op::Cmp, Op::Dec, Op::Dcp,
    /* E */ Op::Cpx, Op::Sbc, Op::Nop, Op::Isb, Op::Cpx, Op::Sbc, Op::Inc, Op::Isb, Op::Inx, Op::Sbc, Op::Nop, Op::Sbc, Op::Cpx, Op::Sbc, Op::Inc, Op::Isb,
    /* F */ Op::Beq, Op::Sbc, Op::Jam, Op::Isb, Op::Nop, Op::Sbc, Op::Inc, Op::Isb, Op::Sed, Op::Sbc, Op::Nop, Op::Isb, Op::Nop, Op::Sbc, Op::Inc, Op::Isb,
];
