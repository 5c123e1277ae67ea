//! 6502 CPU core implementation.
//!
//! This module contains the CPU structure with all registers, the per-cycle
//! micro-step dispatcher, interrupt handling, and the opcode executors.

use crate::addressing::{AddrMode, ADDR_MODE_TABLE};
use crate::bus::Bus;
use crate::opcodes::{Kind, Op, OP_TABLE, UNSTABLE_MAGIC};
use crate::state::{Interrupt, Stage};
use crate::status::Status;

/// Register snapshot, for monitors and host diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// Program counter.
    pub pc: u16,
    /// Stack pointer (effective stack address is `0x0100 | sp`).
    pub sp: u8,
    /// Accumulator.
    pub a: u8,
    /// X index register.
    pub x: u8,
    /// Y index register.
    pub y: u8,
    /// Status flags.
    pub status: Status,
}

/// NMOS 6502 CPU as fitted in the Commodore 1541 drive.
///
/// Cycle-accurate: every [`step`](Cpu::step) call is one bus clock and
/// performs exactly one bus read or one bus write through the host's
/// [`Bus`], dummy accesses included. Between calls the host owns the
/// interrupt lines via [`assert_irq`](Cpu::assert_irq) and friends.
#[derive(Debug, Clone, Copy)]
#[allow(clippy::struct_excessive_bools)] // Bools model the CPU's input latches
pub struct Cpu {
    /// Accumulator register
    pub a: u8,
    /// X index register
    pub x: u8,
    /// Y index register
    pub y: u8,
    /// Program counter
    pub pc: u16,
    /// Stack pointer (points into $0100-$01FF)
    pub sp: u8,
    /// Status flags
    pub status: Status,

    // ===== Micro-step machine =====
    /// Next micro-step; never invalid, FetchOpcode between instructions
    stage: Stage,
    /// Last fetched instruction byte
    opcode: u8,
    /// Decoded operation for the current instruction
    op: Op,
    /// Decoded addressing mode for the current instruction
    addr_mode: AddrMode,
    /// Effective address
    ea: u16,
    /// Pre-index base address (page-cross detection, SH* corruption)
    base: u16,
    /// Zero-page pointer intermediate
    ia: u16,
    /// Branch displacement
    offset: i8,
    /// Operand scratch value
    value: u8,
    /// Total bus cycles executed
    cycles: u64,

    // ===== Interrupt plumbing =====
    /// Which entry of the shared interrupt sequence is running
    interrupt: Interrupt,
    /// The running sequence was entered by BRK (B set on the pushed status)
    from_brk: bool,
    /// NMI input line level
    nmi_line: bool,
    /// NMI edge latch, cleared when the NMI is serviced
    nmi_pending: bool,
    /// IRQ input line level
    irq_line: bool,
    /// CLI just enabled interrupts; the next poll skips once
    cli_masking_interrupt: bool,
    /// A 3-cycle taken branch is in flight; the next poll skips once
    branch_masking_interrupt: bool,
    /// RDY input line level (true = ready; false stalls read cycles)
    rdy: bool,
}

impl Cpu {
    /// Create a new CPU in power-on state with the reset sequence
    /// scheduled: the first seven [`step`](Cpu::step) calls run it and
    /// leave PC at the $FFFC/$FFFD vector.
    #[must_use]
    pub fn new() -> Self {
        let mut cpu = Self {
            a: 0,
            x: 0,
            y: 0,
            pc: 0,
            sp: 0,
            status: Status::new(),
            stage: Stage::FetchOpcode,
            opcode: 0,
            op: Op::Brk,
            addr_mode: AddrMode::Brk,
            ea: 0,
            base: 0,
            ia: 0,
            offset: 0,
            value: 0,
            cycles: 0,
            interrupt: Interrupt::Reset,
            from_brk: false,
            nmi_line: false,
            nmi_pending: false,
            irq_line: false,
            cli_masking_interrupt: false,
            branch_masking_interrupt: false,
            rdy: true,
        };
        cpu.reset();
        cpu
    }

    /// Schedule the 7-cycle reset sequence at the next `step`.
    ///
    /// Two dummy program reads, three dummy stack reads (SP decrements
    /// without writing, per real hardware), then the $FFFC/$FFFD vector.
    /// I is forced, B cleared; A/X/Y/D keep their prior values. Reset is
    /// also the only way out of a JAM.
    pub fn reset(&mut self) {
        self.status.insert(Status::I | Status::U);
        self.status.remove(Status::B);
        self.interrupt = Interrupt::Reset;
        self.from_brk = false;
        self.nmi_pending = false;
        self.cli_masking_interrupt = false;
        self.branch_masking_interrupt = false;
        self.stage = Stage::ResetDummy1;
    }

    /// Execute exactly one bus cycle.
    ///
    /// Runs the current micro-step: one bus read or one bus write, then the
    /// cursor advances. While RDY is held low a read cycle still issues its
    /// bus read - peripherals observe it - but the machine does not move.
    pub fn step(&mut self, bus: &mut impl Bus) {
        if !self.rdy && self.stage.is_read() {
            let saved = *self;
            self.run_stage(bus);
            *self = saved;
            self.cycles = self.cycles.wrapping_add(1);
            return;
        }
        self.cycles = self.cycles.wrapping_add(1);
        self.run_stage(bus);
    }

    /// Pull the IRQ line low. Level-sensitive: the interrupt is taken at
    /// every poll point while the line is held and I is clear.
    pub fn assert_irq(&mut self) {
        self.irq_line = true;
    }

    /// Release the IRQ line.
    pub fn release_irq(&mut self) {
        self.irq_line = false;
    }

    /// Pull the NMI line low. Edge-triggered: only the released-to-asserted
    /// transition latches a pending NMI.
    pub fn assert_nmi(&mut self) {
        if !self.nmi_line {
            self.nmi_line = true;
            self.nmi_pending = true;
        }
    }

    /// Release the NMI line, re-arming the edge detector.
    pub fn release_nmi(&mut self) {
        self.nmi_line = false;
    }

    /// Pulse the SO pin: sets the V flag immediately and unconditionally.
    /// The 1541 ties this to the disk controller's byte-ready line.
    pub fn set_so(&mut self) {
        self.status.set_overflow_pin();
    }

    /// Drive the RDY line. While `ready` is false the CPU stalls on read
    /// cycles (the read is still issued each cycle); write cycles complete
    /// normally. The 1541 leaves the line released.
    pub fn set_rdy(&mut self, ready: bool) {
        self.rdy = ready;
    }

    /// True when the next `step` is an instruction fetch (the SYNC pin).
    #[must_use]
    pub fn sync(&self) -> bool {
        self.stage == Stage::FetchOpcode
    }

    /// True while the CPU is RDY-stalled on a read cycle or jammed.
    #[must_use]
    pub fn halted(&self) -> bool {
        self.stage == Stage::Jammed || (!self.rdy && self.stage.is_read())
    }

    /// True once a JAM opcode has locked the CPU up (until `reset`).
    #[must_use]
    pub fn is_jammed(&self) -> bool {
        self.stage == Stage::Jammed
    }

    /// Total bus cycles executed.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// The micro-step the next `step` will run (for debugging and tests).
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Snapshot of the programmer-visible registers.
    #[must_use]
    pub fn regs(&self) -> Registers {
        Registers {
            pc: self.pc,
            sp: self.sp,
            a: self.a,
            x: self.x,
            y: self.y,
            status: self.status,
        }
    }

    // =========================================================================
    // MICRO-STEP DISPATCH
    // =========================================================================

    fn run_stage(&mut self, bus: &mut impl Bus) {
        match self.stage {
            Stage::FetchOpcode => self.stage_fetch_opcode(bus),
            Stage::Implied => self.stage_implied(bus),
            Stage::Immediate => self.stage_immediate(bus),
            Stage::Relative => self.stage_relative(bus),
            Stage::BranchTaken => self.stage_branch_taken(bus),
            Stage::BranchFix => self.stage_branch_fix(bus),
            Stage::ZpAddr => self.stage_zp_addr(bus),
            Stage::ZpIndex => self.stage_zp_index(bus),
            Stage::AbsLo => self.stage_abs_lo(bus),
            Stage::AbsHi => self.stage_abs_hi(bus),
            Stage::IndexedFix => self.stage_indexed_fix(bus),
            Stage::IzxDummy => self.stage_izx_dummy(bus),
            Stage::IzxLo => self.stage_izx_lo(bus),
            Stage::IzxHi => self.stage_izx_hi(bus),
            Stage::IzyLo => self.stage_izy_lo(bus),
            Stage::IzyHi => self.stage_izy_hi(bus),
            Stage::IndLo => self.stage_ind_lo(bus),
            Stage::IndHi => self.stage_ind_hi(bus),
            Stage::ReadValue => self.stage_read_value(bus),
            Stage::WriteValue => self.stage_write_value(bus),
            Stage::RmwRead => self.stage_rmw_read(bus),
            Stage::RmwDummyWrite => self.stage_rmw_dummy_write(bus),
            Stage::RmwWrite => self.stage_rmw_write(bus),
            Stage::JsrStackPeek => self.stage_jsr_stack_peek(bus),
            Stage::JsrPushPch => self.stage_jsr_push_pch(bus),
            Stage::JsrPushPcl => self.stage_jsr_push_pcl(bus),
            Stage::JsrHi => self.stage_jsr_hi(bus),
            Stage::RtsDummy => self.stage_rts_dummy(bus),
            Stage::RtsStackPeek => self.stage_rts_stack_peek(bus),
            Stage::RtsPullPcl => self.stage_rts_pull_pcl(bus),
            Stage::RtsPullPch => self.stage_rts_pull_pch(bus),
            Stage::RtsFinish => self.stage_rts_finish(bus),
            Stage::RtiDummy => self.stage_rti_dummy(bus),
            Stage::RtiStackPeek => self.stage_rti_stack_peek(bus),
            Stage::RtiPullStatus => self.stage_rti_pull_status(bus),
            Stage::RtiPullPcl => self.stage_rti_pull_pcl(bus),
            Stage::RtiPullPch => self.stage_rti_pull_pch(bus),
            Stage::PushDummy => self.stage_push_dummy(bus),
            Stage::PushWrite => self.stage_push_write(bus),
            Stage::PullDummy => self.stage_pull_dummy(bus),
            Stage::PullStackPeek => self.stage_pull_stack_peek(bus),
            Stage::PullRead => self.stage_pull_read(bus),
            Stage::BrkDummy => self.stage_brk_dummy(bus),
            Stage::IntPushPch => self.stage_int_push_pch(bus),
            Stage::IntPushPcl => self.stage_int_push_pcl(bus),
            Stage::IntPushStatus => self.stage_int_push_status(bus),
            Stage::IntVectorLo => self.stage_int_vector_lo(bus),
            Stage::IntVectorHi => self.stage_int_vector_hi(bus),
            Stage::ResetDummy1 => self.stage_reset_dummy(bus, Stage::ResetDummy2),
            Stage::ResetDummy2 => self.stage_reset_dummy(bus, Stage::ResetSpull1),
            Stage::ResetSpull1 => self.stage_reset_spull(bus, Stage::ResetSpull2),
            Stage::ResetSpull2 => self.stage_reset_spull(bus, Stage::ResetSpull3),
            Stage::ResetSpull3 => self.stage_reset_spull(bus, Stage::IntVectorLo),
            Stage::Jammed => {
                let _ = bus.read(self.pc);
            }
        }
    }

    /// Opcode fetch (T0 of every instruction), with the interrupt poll.
    fn stage_fetch_opcode(&mut self, bus: &mut impl Bus) {
        // The masks live for exactly one boundary: consume them now,
        // whatever the poll decides.
        let cli_mask = self.cli_masking_interrupt;
        let branch_mask = self.branch_masking_interrupt;
        self.cli_masking_interrupt = false;
        self.branch_masking_interrupt = false;

        if self.nmi_pending {
            self.begin_interrupt(bus, Interrupt::Nmi);
            return;
        }
        if self.irq_line && self.status.irq_enabled() && !cli_mask && !branch_mask {
            self.begin_interrupt(bus, Interrupt::Irq);
            return;
        }

        self.opcode = bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        self.op = OP_TABLE[self.opcode as usize];
        self.addr_mode = ADDR_MODE_TABLE[self.opcode as usize];

        if self.op == Op::Jam {
            log::warn!(
                "CPU jammed by opcode {:#04X} at {:#06X}",
                self.opcode,
                self.pc.wrapping_sub(1)
            );
            self.stage = Stage::Jammed;
            return;
        }
        if self.addr_mode == AddrMode::Brk {
            self.interrupt = Interrupt::Brk;
            self.from_brk = true;
        }
        self.stage = entry_stage(self.addr_mode);
    }

    /// Divert the would-be fetch into the hardware interrupt sequence.
    /// This read is T0 of the 7-cycle entry; PC is not consumed.
    fn begin_interrupt(&mut self, bus: &mut impl Bus, kind: Interrupt) {
        let _ = bus.read(self.pc);
        self.interrupt = kind;
        self.from_brk = false;
        self.stage = Stage::BrkDummy;
    }

    /// Next stage once the effective address is resolved.
    fn operand_stage(&self) -> Stage {
        match self.op.kind() {
            Kind::Read => Stage::ReadValue,
            Kind::Write => Stage::WriteValue,
            Kind::Rmw => Stage::RmwRead,
        }
    }

    /// Next stage after indexing an absolute or (zp),Y base. Writes and
    /// RMW always pay the fix-up cycle; reads only on a page cross.
    fn indexed_stage(&self) -> Stage {
        let crossed = (self.base ^ self.ea) & 0xFF00 != 0;
        match self.op.kind() {
            Kind::Read if !crossed => Stage::ReadValue,
            _ => Stage::IndexedFix,
        }
    }

    // =========================================================================
    // ADDRESS-MODE STAGES - one bus access each
    // =========================================================================

    fn stage_implied(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(self.pc);
        self.exec_implied_op();
        self.stage = Stage::FetchOpcode;
    }

    fn stage_immediate(&mut self, bus: &mut impl Bus) {
        self.value = bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        self.exec_read_op();
        self.stage = Stage::FetchOpcode;
    }

    fn stage_relative(&mut self, bus: &mut impl Bus) {
        self.offset = bus.read(self.pc) as i8;
        self.pc = self.pc.wrapping_add(1);

        if self.branch_taken() {
            let target = self.pc.wrapping_add(self.offset as u16);
            if (target ^ self.pc) & 0xFF00 == 0 {
                // A 3-cycle taken branch never polls on its last cycle, so
                // an interrupt arriving now waits one extra instruction.
                self.branch_masking_interrupt = true;
            }
            self.stage = Stage::BranchTaken;
        } else {
            self.stage = Stage::FetchOpcode;
        }
    }

    fn stage_branch_taken(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(self.pc);

        let target = self.pc.wrapping_add(self.offset as u16);
        if (target ^ self.pc) & 0xFF00 == 0 {
            self.pc = target;
            self.stage = Stage::FetchOpcode;
        } else {
            // PCL is updated this cycle; PCH gets fixed in the extra one.
            self.ea = (self.pc & 0xFF00) | (target & 0x00FF);
            self.pc = target;
            self.stage = Stage::BranchFix;
        }
    }

    fn stage_branch_fix(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(self.ea);
        self.stage = Stage::FetchOpcode;
    }

    fn stage_zp_addr(&mut self, bus: &mut impl Bus) {
        let byte = u16::from(bus.read(self.pc));
        self.pc = self.pc.wrapping_add(1);

        match self.addr_mode {
            AddrMode::Zp => {
                self.ea = byte;
                self.stage = self.operand_stage();
            }
            AddrMode::Zpx | AddrMode::Zpy => {
                self.ea = byte;
                self.stage = Stage::ZpIndex;
            }
            AddrMode::Izx => {
                self.ia = byte;
                self.stage = Stage::IzxDummy;
            }
            AddrMode::Izy => {
                self.ia = byte;
                self.stage = Stage::IzyLo;
            }
            _ => {
                self.stage = Stage::FetchOpcode;
            }
        }
    }

    fn stage_zp_index(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(self.ea);
        let idx = if self.addr_mode == AddrMode::Zpy {
            self.y
        } else {
            self.x
        };
        // Indexing never escapes the zero page
        self.ea = u16::from((self.ea as u8).wrapping_add(idx));
        self.stage = self.operand_stage();
    }

    fn stage_abs_lo(&mut self, bus: &mut impl Bus) {
        self.ea = u16::from(bus.read(self.pc));
        self.pc = self.pc.wrapping_add(1);
        self.stage = if self.addr_mode == AddrMode::Jsr {
            Stage::JsrStackPeek
        } else {
            Stage::AbsHi
        };
    }

    fn stage_abs_hi(&mut self, bus: &mut impl Bus) {
        let addr = u16::from(bus.read(self.pc)) << 8 | self.ea;
        self.pc = self.pc.wrapping_add(1);

        match self.addr_mode {
            AddrMode::Abs => {
                self.ea = addr;
                if self.op == Op::Jmp {
                    self.pc = addr;
                    self.stage = Stage::FetchOpcode;
                } else {
                    self.stage = self.operand_stage();
                }
            }
            AddrMode::Ind => {
                self.ea = addr;
                self.stage = Stage::IndLo;
            }
            AddrMode::Abx | AddrMode::Aby => {
                let idx = if self.addr_mode == AddrMode::Abx {
                    self.x
                } else {
                    self.y
                };
                self.base = addr;
                self.ea = addr.wrapping_add(u16::from(idx));
                self.stage = self.indexed_stage();
            }
            _ => {
                self.stage = Stage::FetchOpcode;
            }
        }
    }

    fn stage_indexed_fix(&mut self, bus: &mut impl Bus) {
        // Dummy read at the pre-carry address; peripherals observe it
        let _ = bus.read((self.base & 0xFF00) | (self.ea & 0x00FF));
        self.stage = self.operand_stage();
    }

    fn stage_izx_dummy(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(self.ia);
        self.ia = u16::from((self.ia as u8).wrapping_add(self.x));
        self.stage = Stage::IzxLo;
    }

    fn stage_izx_lo(&mut self, bus: &mut impl Bus) {
        self.ea = u16::from(bus.read(self.ia));
        self.stage = Stage::IzxHi;
    }

    fn stage_izx_hi(&mut self, bus: &mut impl Bus) {
        let hi = bus.read(u16::from((self.ia as u8).wrapping_add(1)));
        self.ea |= u16::from(hi) << 8;
        self.stage = self.operand_stage();
    }

    fn stage_izy_lo(&mut self, bus: &mut impl Bus) {
        self.ea = u16::from(bus.read(self.ia));
        self.stage = Stage::IzyHi;
    }

    fn stage_izy_hi(&mut self, bus: &mut impl Bus) {
        let hi = bus.read(u16::from((self.ia as u8).wrapping_add(1)));
        self.base = u16::from(hi) << 8 | self.ea;
        self.ea = self.base.wrapping_add(u16::from(self.y));
        self.stage = self.indexed_stage();
    }

    fn stage_ind_lo(&mut self, bus: &mut impl Bus) {
        self.value = bus.read(self.ea);
        self.stage = Stage::IndHi;
    }

    fn stage_ind_hi(&mut self, bus: &mut impl Bus) {
        // The pointer's low byte wraps without carrying into the high byte
        let hi_addr = (self.ea & 0xFF00) | u16::from((self.ea as u8).wrapping_add(1));
        let hi = bus.read(hi_addr);
        self.pc = u16::from(hi) << 8 | u16::from(self.value);
        self.stage = Stage::FetchOpcode;
    }

    fn stage_read_value(&mut self, bus: &mut impl Bus) {
        self.value = bus.read(self.ea);
        self.exec_read_op();
        self.stage = Stage::FetchOpcode;
    }

    fn stage_write_value(&mut self, bus: &mut impl Bus) {
        let (addr, value) = self.store_value();
        bus.write(addr, value);
        self.stage = Stage::FetchOpcode;
    }

    fn stage_rmw_read(&mut self, bus: &mut impl Bus) {
        self.value = bus.read(self.ea);
        self.stage = Stage::RmwDummyWrite;
    }

    fn stage_rmw_dummy_write(&mut self, bus: &mut impl Bus) {
        // The unmodified value goes back out first (hardware behavior)
        bus.write(self.ea, self.value);
        self.stage = Stage::RmwWrite;
    }

    fn stage_rmw_write(&mut self, bus: &mut impl Bus) {
        let result = self.exec_rmw_op(self.value);
        bus.write(self.ea, result);
        self.stage = Stage::FetchOpcode;
    }

    fn stage_jsr_stack_peek(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(0x0100 | u16::from(self.sp));
        self.stage = Stage::JsrPushPch;
    }

    fn stage_jsr_push_pch(&mut self, bus: &mut impl Bus) {
        bus.write(0x0100 | u16::from(self.sp), (self.pc >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.stage = Stage::JsrPushPcl;
    }

    fn stage_jsr_push_pcl(&mut self, bus: &mut impl Bus) {
        bus.write(0x0100 | u16::from(self.sp), self.pc as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.stage = Stage::JsrHi;
    }

    fn stage_jsr_hi(&mut self, bus: &mut impl Bus) {
        // The return address on the stack points at this byte; RTS
        // increments past it.
        let hi = bus.read(self.pc);
        self.pc = u16::from(hi) << 8 | self.ea;
        self.stage = Stage::FetchOpcode;
    }

    fn stage_rts_dummy(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(self.pc);
        self.stage = Stage::RtsStackPeek;
    }

    fn stage_rts_stack_peek(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(0x0100 | u16::from(self.sp));
        self.stage = Stage::RtsPullPcl;
    }

    fn stage_rts_pull_pcl(&mut self, bus: &mut impl Bus) {
        self.sp = self.sp.wrapping_add(1);
        self.value = bus.read(0x0100 | u16::from(self.sp));
        self.stage = Stage::RtsPullPch;
    }

    fn stage_rts_pull_pch(&mut self, bus: &mut impl Bus) {
        self.sp = self.sp.wrapping_add(1);
        let hi = bus.read(0x0100 | u16::from(self.sp));
        self.pc = u16::from(hi) << 8 | u16::from(self.value);
        self.stage = Stage::RtsFinish;
    }

    fn stage_rts_finish(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        self.stage = Stage::FetchOpcode;
    }

    fn stage_rti_dummy(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        self.stage = Stage::RtiStackPeek;
    }

    fn stage_rti_stack_peek(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(0x0100 | u16::from(self.sp));
        self.stage = Stage::RtiPullStatus;
    }

    fn stage_rti_pull_status(&mut self, bus: &mut impl Bus) {
        self.sp = self.sp.wrapping_add(1);
        self.status = Status::from_stack_byte(bus.read(0x0100 | u16::from(self.sp)));
        self.stage = Stage::RtiPullPcl;
    }

    fn stage_rti_pull_pcl(&mut self, bus: &mut impl Bus) {
        self.sp = self.sp.wrapping_add(1);
        self.value = bus.read(0x0100 | u16::from(self.sp));
        self.stage = Stage::RtiPullPch;
    }

    fn stage_rti_pull_pch(&mut self, bus: &mut impl Bus) {
        self.sp = self.sp.wrapping_add(1);
        let hi = bus.read(0x0100 | u16::from(self.sp));
        self.pc = u16::from(hi) << 8 | u16::from(self.value);
        self.stage = Stage::FetchOpcode;
    }

    fn stage_push_dummy(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(self.pc);
        self.stage = Stage::PushWrite;
    }

    fn stage_push_write(&mut self, bus: &mut impl Bus) {
        let value = match self.op {
            // PHP pushes with B and U forced on
            Op::Php => self.status.to_stack_byte(true),
            _ => self.a,
        };
        bus.write(0x0100 | u16::from(self.sp), value);
        self.sp = self.sp.wrapping_sub(1);
        self.stage = Stage::FetchOpcode;
    }

    fn stage_pull_dummy(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(self.pc);
        self.stage = Stage::PullStackPeek;
    }

    fn stage_pull_stack_peek(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(0x0100 | u16::from(self.sp));
        self.stage = Stage::PullRead;
    }

    fn stage_pull_read(&mut self, bus: &mut impl Bus) {
        self.sp = self.sp.wrapping_add(1);
        let value = bus.read(0x0100 | u16::from(self.sp));
        match self.op {
            Op::Pla => {
                self.a = value;
                self.status.set_zn(self.a);
            }
            _ => {
                // PLP: B is stripped, U forced
                self.status = Status::from_stack_byte(value);
            }
        }
        self.stage = Stage::FetchOpcode;
    }

    // =========================================================================
    // INTERRUPT AND RESET SEQUENCES
    // =========================================================================

    fn stage_brk_dummy(&mut self, bus: &mut impl Bus) {
        let _ = bus.read(self.pc);
        if self.from_brk {
            // BRK consumes a padding byte; hardware entries leave PC alone
            self.pc = self.pc.wrapping_add(1);
        }
        self.stage = Stage::IntPushPch;
    }

    fn stage_int_push_pch(&mut self, bus: &mut impl Bus) {
        bus.write(0x0100 | u16::from(self.sp), (self.pc >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.stage = Stage::IntPushPcl;
    }

    fn stage_int_push_pcl(&mut self, bus: &mut impl Bus) {
        bus.write(0x0100 | u16::from(self.sp), self.pc as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.stage = Stage::IntPushStatus;
    }

    fn stage_int_push_status(&mut self, bus: &mut impl Bus) {
        // Morph point: an NMI edge during the pushes hijacks the vector.
        // A hijacked BRK still pushes B=1, which is how handlers tell the
        // two entries apart.
        if self.nmi_pending && matches!(self.interrupt, Interrupt::Irq | Interrupt::Brk) {
            self.interrupt = Interrupt::Nmi;
        }
        bus.write(
            0x0100 | u16::from(self.sp),
            self.status.to_stack_byte(self.from_brk),
        );
        self.sp = self.sp.wrapping_sub(1);
        self.status.insert(Status::I);
        self.stage = Stage::IntVectorLo;
    }

    fn stage_int_vector_lo(&mut self, bus: &mut impl Bus) {
        self.value = bus.read(self.interrupt.vector());
        self.stage = Stage::IntVectorHi;
    }

    fn stage_int_vector_hi(&mut self, bus: &mut impl Bus) {
        let hi = bus.read(self.interrupt.vector().wrapping_add(1));
        self.pc = u16::from(hi) << 8 | u16::from(self.value);
        if self.interrupt == Interrupt::Nmi {
            self.nmi_pending = false;
        }
        self.stage = Stage::FetchOpcode;
    }

    fn stage_reset_dummy(&mut self, bus: &mut impl Bus, next: Stage) {
        let _ = bus.read(self.pc);
        self.stage = next;
    }

    fn stage_reset_spull(&mut self, bus: &mut impl Bus, next: Stage) {
        // Reset runs the push cycles with the bus held to read
        let _ = bus.read(0x0100 | u16::from(self.sp));
        self.sp = self.sp.wrapping_sub(1);
        self.stage = next;
    }

    // =========================================================================
    // OPCODE EXECUTORS
    // =========================================================================

    /// Branch condition for the current (branch) opcode.
    fn branch_taken(&self) -> bool {
        match self.op {
            Op::Bpl => !self.status.contains(Status::N),
            Op::Bmi => self.status.contains(Status::N),
            Op::Bvc => !self.status.contains(Status::V),
            Op::Bvs => self.status.contains(Status::V),
            Op::Bcc => !self.status.contains(Status::C),
            Op::Bcs => self.status.contains(Status::C),
            Op::Bne => !self.status.contains(Status::Z),
            Op::Beq => self.status.contains(Status::Z),
            _ => false,
        }
    }

    /// Implied and accumulator operations (register-only).
    fn exec_implied_op(&mut self) {
        match self.op {
            // Accumulator shifts
            Op::Asl => {
                self.status.set(Status::C, self.a & 0x80 != 0);
                self.a <<= 1;
                self.status.set_zn(self.a);
            }
            Op::Lsr => {
                self.status.set(Status::C, self.a & 0x01 != 0);
                self.a >>= 1;
                self.status.set_zn(self.a);
            }
            Op::Rol => {
                let carry_in = u8::from(self.status.contains(Status::C));
                self.status.set(Status::C, self.a & 0x80 != 0);
                self.a = (self.a << 1) | carry_in;
                self.status.set_zn(self.a);
            }
            Op::Ror => {
                let carry_in = u8::from(self.status.contains(Status::C));
                self.status.set(Status::C, self.a & 0x01 != 0);
                self.a = (self.a >> 1) | (carry_in << 7);
                self.status.set_zn(self.a);
            }

            // Transfers
            Op::Tax => {
                self.x = self.a;
                self.status.set_zn(self.x);
            }
            Op::Tay => {
                self.y = self.a;
                self.status.set_zn(self.y);
            }
            Op::Txa => {
                self.a = self.x;
                self.status.set_zn(self.a);
            }
            Op::Tya => {
                self.a = self.y;
                self.status.set_zn(self.a);
            }
            Op::Tsx => {
                self.x = self.sp;
                self.status.set_zn(self.x);
            }
            Op::Txs => {
                self.sp = self.x;
            }

            // Register increment/decrement
            Op::Inx => {
                self.x = self.x.wrapping_add(1);
                self.status.set_zn(self.x);
            }
            Op::Iny => {
                self.y = self.y.wrapping_add(1);
                self.status.set_zn(self.y);
            }
            Op::Dex => {
                self.x = self.x.wrapping_sub(1);
                self.status.set_zn(self.x);
            }
            Op::Dey => {
                self.y = self.y.wrapping_sub(1);
                self.status.set_zn(self.y);
            }

            // Flags
            Op::Clc => {
                self.status.remove(Status::C);
            }
            Op::Sec => {
                self.status.insert(Status::C);
            }
            Op::Cli => {
                // One instruction must run with I clear before an already
                // asserted IRQ is taken
                if self.status.contains(Status::I) {
                    self.cli_masking_interrupt = true;
                }
                self.status.remove(Status::I);
            }
            Op::Sei => {
                self.status.insert(Status::I);
            }
            Op::Clv => {
                self.status.remove(Status::V);
            }
            Op::Cld => {
                self.status.remove(Status::D);
            }
            Op::Sed => {
                self.status.insert(Status::D);
            }

            Op::Nop => {}

            _ => {}
        }
    }

    /// Read operations: operate on the fetched operand in `self.value`.
    #[allow(clippy::too_many_lines)]
    fn exec_read_op(&mut self) {
        let value = self.value;
        match self.op {
            Op::Lda => {
                self.a = value;
                self.status.set_zn(self.a);
            }
            Op::Ldx => {
                self.x = value;
                self.status.set_zn(self.x);
            }
            Op::Ldy => {
                self.y = value;
                self.status.set_zn(self.y);
            }
            Op::Adc => self.add(value),
            Op::Sbc => self.subtract(value),
            Op::And => {
                self.a &= value;
                self.status.set_zn(self.a);
            }
            Op::Ora => {
                self.a |= value;
                self.status.set_zn(self.a);
            }
            Op::Eor => {
                self.a ^= value;
                self.status.set_zn(self.a);
            }
            Op::Cmp => self.compare(self.a, value),
            Op::Cpx => self.compare(self.x, value),
            Op::Cpy => self.compare(self.y, value),
            Op::Bit => {
                self.status.set(Status::Z, self.a & value == 0);
                self.status.set(Status::V, value & 0x40 != 0);
                self.status.set(Status::N, value & 0x80 != 0);
            }

            // Undocumented
            Op::Lax => {
                self.a = value;
                self.x = value;
                self.status.set_zn(value);
            }
            Op::Las => {
                self.sp &= value;
                self.a = self.sp;
                self.x = self.sp;
                self.status.set_zn(self.sp);
            }
            Op::Anc => {
                self.a &= value;
                self.status.set_zn(self.a);
                self.status
                    .set(Status::C, self.status.contains(Status::N));
            }
            Op::Asr => {
                let masked = self.a & value;
                self.status.set(Status::C, masked & 0x01 != 0);
                self.a = masked >> 1;
                self.status.set_zn(self.a);
            }
            Op::Arr => {
                let carry_in = u8::from(self.status.contains(Status::C));
                self.a = ((self.a & value) >> 1) | (carry_in << 7);
                self.status.set_zn(self.a);
                self.status.set(Status::C, self.a & 0x40 != 0);
                self.status
                    .set(Status::V, ((self.a >> 6) ^ (self.a >> 5)) & 0x01 != 0);
            }
            Op::Xaa => {
                self.a = (self.a | UNSTABLE_MAGIC) & self.x & value;
                self.status.set_zn(self.a);
            }
            Op::Lxa => {
                self.a = (self.a | UNSTABLE_MAGIC) & value;
                self.x = self.a;
                self.status.set_zn(self.a);
            }
            Op::Sbx => {
                let masked = self.a & self.x;
                self.status.set(Status::C, masked >= value);
                self.x = masked.wrapping_sub(value);
                self.status.set_zn(self.x);
            }

            Op::Nop => {}

            _ => {}
        }
    }

    /// Write operations: pick the value and target. SHA/SHX/SHY/SHS store
    /// `reg & (H+1)` and corrupt the target's high byte on a page cross.
    fn store_value(&mut self) -> (u16, u8) {
        match self.op {
            Op::Sta => (self.ea, self.a),
            Op::Stx => (self.ea, self.x),
            Op::Sty => (self.ea, self.y),
            Op::Sax => (self.ea, self.a & self.x),
            Op::Sha => self.store_high_and(self.a & self.x),
            Op::Shx => self.store_high_and(self.x),
            Op::Shy => self.store_high_and(self.y),
            Op::Shs => {
                self.sp = self.a & self.x;
                self.store_high_and(self.sp)
            }
            _ => (self.ea, self.value),
        }
    }

    fn store_high_and(&self, reg: u8) -> (u16, u8) {
        let value = reg & ((self.base >> 8) as u8).wrapping_add(1);
        if (self.base ^ self.ea) & 0xFF00 != 0 {
            // Page crossed: the corrupted value replaces the target's
            // high byte too
            let addr = u16::from(value & (self.ea >> 8) as u8) << 8 | (self.ea & 0x00FF);
            (addr, value)
        } else {
            (self.ea, value)
        }
    }

    /// Read-modify-write operations: produce the value written back.
    fn exec_rmw_op(&mut self, value: u8) -> u8 {
        match self.op {
            Op::Asl => {
                self.status.set(Status::C, value & 0x80 != 0);
                let result = value << 1;
                self.status.set_zn(result);
                result
            }
            Op::Lsr => {
                self.status.set(Status::C, value & 0x01 != 0);
                let result = value >> 1;
                self.status.set_zn(result);
                result
            }
            Op::Rol => {
                let carry_in = u8::from(self.status.contains(Status::C));
                self.status.set(Status::C, value & 0x80 != 0);
                let result = (value << 1) | carry_in;
                self.status.set_zn(result);
                result
            }
            Op::Ror => {
                let carry_in = u8::from(self.status.contains(Status::C));
                self.status.set(Status::C, value & 0x01 != 0);
                let result = (value >> 1) | (carry_in << 7);
                self.status.set_zn(result);
                result
            }
            Op::Inc => {
                let result = value.wrapping_add(1);
                self.status.set_zn(result);
                result
            }
            Op::Dec => {
                let result = value.wrapping_sub(1);
                self.status.set_zn(result);
                result
            }

            // Undocumented compositions
            Op::Slo => {
                self.status.set(Status::C, value & 0x80 != 0);
                let result = value << 1;
                self.a |= result;
                self.status.set_zn(self.a);
                result
            }
            Op::Rla => {
                let carry_in = u8::from(self.status.contains(Status::C));
                self.status.set(Status::C, value & 0x80 != 0);
                let result = (value << 1) | carry_in;
                self.a &= result;
                self.status.set_zn(self.a);
                result
            }
            Op::Sre => {
                self.status.set(Status::C, value & 0x01 != 0);
                let result = value >> 1;
                self.a ^= result;
                self.status.set_zn(self.a);
                result
            }
            Op::Rra => {
                let carry_in = u8::from(self.status.contains(Status::C));
                self.status.set(Status::C, value & 0x01 != 0);
                let result = (value >> 1) | (carry_in << 7);
                self.add(result);
                result
            }
            Op::Dcp => {
                let result = value.wrapping_sub(1);
                self.compare(self.a, result);
                result
            }
            Op::Isb => {
                let result = value.wrapping_add(1);
                self.subtract(result);
                result
            }

            _ => value,
        }
    }

    /// ADC. N, Z and V always reflect the binary sum; decimal mode only
    /// adjusts the result and the carry (NMOS convention).
    fn add(&mut self, value: u8) {
        let carry = u16::from(self.status.contains(Status::C));
        let sum = u16::from(self.a) + u16::from(value) + carry;
        self.status.set(
            Status::V,
            !(self.a ^ value) & (self.a ^ sum as u8) & 0x80 != 0,
        );
        self.status.set_zn(sum as u8);

        if self.status.contains(Status::D) {
            let mut lo = u16::from(self.a & 0x0F) + u16::from(value & 0x0F) + carry;
            if lo > 0x09 {
                lo = ((lo + 0x06) & 0x0F) + 0x10;
            }
            let mut result = u16::from(self.a & 0xF0) + u16::from(value & 0xF0) + lo;
            if result > 0x9F {
                result += 0x60;
            }
            self.status.set(Status::C, result > 0xFF);
            self.a = result as u8;
        } else {
            self.status.set(Status::C, sum > 0xFF);
            self.a = sum as u8;
        }
    }

    /// SBC. All flags come from the binary difference; decimal mode only
    /// adjusts the result.
    fn subtract(&mut self, value: u8) {
        let borrow = u16::from(!self.status.contains(Status::C));
        let diff = u16::from(self.a)
            .wrapping_sub(u16::from(value))
            .wrapping_sub(borrow);
        self.status.set(
            Status::V,
            (self.a ^ value) & (self.a ^ diff as u8) & 0x80 != 0,
        );
        self.status.set_zn(diff as u8);

        if self.status.contains(Status::D) {
            let mut lo = i16::from(self.a & 0x0F) - i16::from(value & 0x0F) - borrow as i16;
            if lo < 0 {
                lo = ((lo - 0x06) & 0x0F) - 0x10;
            }
            let mut result = i16::from(self.a & 0xF0) - i16::from(value & 0xF0) + lo;
            if result < 0 {
                result -= 0x60;
            }
            self.a = result as u8;
        } else {
            self.a = diff as u8;
        }
        self.status.set(Status::C, diff < 0x100);
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.status.set(Status::C, register >= value);
        self.status.set_zn(register.wrapping_sub(value));
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

/// First micro-step after the opcode fetch, per addressing mode.
const fn entry_stage(mode: AddrMode) -> Stage {
    match mode {
        AddrMode::Imp | AddrMode::Acc => Stage::Implied,
        AddrMode::Imm => Stage::Immediate,
        AddrMode::Rel => Stage::Relative,
        AddrMode::Zp | AddrMode::Zpx | AddrMode::Zpy | AddrMode::Izx | AddrMode::Izy => {
            Stage::ZpAddr
        }
        AddrMode::Abs | AddrMode::Abx | AddrMode::Aby | AddrMode::Ind | AddrMode::Jsr => {
            Stage::AbsLo
        }
        AddrMode::Brk => Stage::BrkDummy,
        AddrMode::Rts => Stage::RtsDummy,
        AddrMode::Rti => Stage::RtiDummy,
        AddrMode::Push => Stage::PushDummy,
        AddrMode::Pull => Stage::PullDummy,
    }
}
