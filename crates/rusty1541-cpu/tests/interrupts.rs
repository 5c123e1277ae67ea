//! Interrupt, reset, RDY and JAM timing validation.
//!
//! Covers the poll-point policy, the CLI and branch-taken masking quirks,
//! BRK⇄IRQ⇄NMI vector morphing during the shared push sequence, the
//! write-less reset, and the RDY read-stall behavior.

use rusty1541_cpu::{Bus, Cpu, Status};

/// One bus transaction as a peripheral would observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read(u16),
    Write(u16, u8),
}

struct TraceBus {
    memory: [u8; 65536],
    trace: Vec<Access>,
}

impl TraceBus {
    fn new() -> Self {
        Self {
            memory: [0; 65536],
            trace: Vec::new(),
        }
    }

    fn load(&mut self, addr: u16, program: &[u8]) {
        for (i, &byte) in program.iter().enumerate() {
            self.memory[addr as usize + i] = byte;
        }
    }

    fn set_vectors(&mut self, reset: u16, irq: u16, nmi: u16) {
        self.memory[0xFFFC] = reset as u8;
        self.memory[0xFFFD] = (reset >> 8) as u8;
        self.memory[0xFFFE] = irq as u8;
        self.memory[0xFFFF] = (irq >> 8) as u8;
        self.memory[0xFFFA] = nmi as u8;
        self.memory[0xFFFB] = (nmi >> 8) as u8;
    }
}

impl Bus for TraceBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.trace.push(Access::Read(addr));
        self.memory[addr as usize]
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.trace.push(Access::Write(addr, value));
        self.memory[addr as usize] = value;
    }
}

const RESET_AT: u16 = 0x0200;
const IRQ_AT: u16 = 0x0300;
const NMI_AT: u16 = 0x0400;

/// Vectors to $0200/$0300/$0400 (handlers pre-filled with NOPs) and run
/// the reset sequence.
fn boot(bus: &mut TraceBus) -> Cpu {
    bus.set_vectors(RESET_AT, IRQ_AT, NMI_AT);
    for handler in [IRQ_AT, NMI_AT] {
        for i in 0..16 {
            bus.memory[(handler + i) as usize] = 0xEA; // NOP
        }
    }
    let mut cpu = Cpu::new();
    for _ in 0..7 {
        cpu.step(bus);
    }
    assert!(cpu.sync());
    cpu
}

fn step_instruction(cpu: &mut Cpu, bus: &mut TraceBus) -> u32 {
    assert!(cpu.sync());
    let mut cycles = 0;
    loop {
        cpu.step(bus);
        cycles += 1;
        if cpu.sync() {
            return cycles;
        }
    }
}

#[test]
fn reset_sequence_is_seven_cycles_no_writes() {
    let mut bus = TraceBus::new();
    bus.set_vectors(RESET_AT, IRQ_AT, NMI_AT);

    let mut cpu = Cpu::new();
    for _ in 0..7 {
        cpu.step(&mut bus);
    }

    assert_eq!(cpu.pc, RESET_AT);
    assert!(cpu.status.contains(Status::I));
    assert!(cpu.status.contains(Status::U));
    assert!(!cpu.status.contains(Status::B));
    assert!(cpu.sync());

    // No write leaves the CPU during reset; the "pushes" are reads
    assert_eq!(bus.trace.len(), 7);
    assert!(bus.trace.iter().all(|a| matches!(a, Access::Read(_))));
    // Three dummy stack reads as SP walks down from $00 to $FD
    assert_eq!(bus.trace[2], Access::Read(0x0100));
    assert_eq!(bus.trace[3], Access::Read(0x01FF));
    assert_eq!(bus.trace[4], Access::Read(0x01FE));
    assert_eq!(bus.trace[5], Access::Read(0xFFFC));
    assert_eq!(bus.trace[6], Access::Read(0xFFFD));
    assert_eq!(cpu.sp, 0xFD);
}

#[test]
fn reset_decrements_sp_by_three_from_prior_value() {
    let mut bus = TraceBus::new();
    let mut cpu = boot(&mut bus);
    assert_eq!(cpu.sp, 0xFD);

    cpu.reset();
    for _ in 0..7 {
        cpu.step(&mut bus);
    }
    assert_eq!(cpu.sp, 0xFA);
}

#[test]
fn irq_held_off_while_i_set() {
    let mut bus = TraceBus::new();
    bus.load(RESET_AT, &[0xEA, 0xEA, 0xEA, 0xEA]);
    let mut cpu = boot(&mut bus);

    cpu.assert_irq();
    for _ in 0..4 {
        step_instruction(&mut cpu, &mut bus);
    }
    // I is set from reset; nothing fires
    assert_eq!(cpu.pc, RESET_AT + 4);
}

#[test]
fn irq_after_cli_waits_one_extra_instruction() {
    let mut bus = TraceBus::new();
    // CLI, LDA #$01, LDA #$02
    bus.load(RESET_AT, &[0x58, 0xA9, 0x01, 0xA9, 0x02]);
    let mut cpu = boot(&mut bus);

    cpu.assert_irq();
    step_instruction(&mut cpu, &mut bus); // CLI
    step_instruction(&mut cpu, &mut bus); // LDA #$01 still runs
    assert_eq!(cpu.a, 0x01);

    // The next boundary services the IRQ: 7 cycles into the handler
    let cycles = step_instruction(&mut cpu, &mut bus);
    assert_eq!(cycles, 7 + 2); // entry + first handler NOP
    assert_eq!(cpu.a, 0x01); // LDA #$02 never ran
    assert_eq!(cpu.pc, IRQ_AT + 1);

    // Return address on the stack points at LDA #$02, status has B=0
    assert_eq!(bus.memory[0x01FD], 0x02); // PCH
    assert_eq!(bus.memory[0x01FC], 0x04); // PCL
    let pushed = Status::from_bits_truncate(bus.memory[0x01FB]);
    assert!(!pushed.contains(Status::B));
    assert!(pushed.contains(Status::U));
    assert!(!pushed.contains(Status::I));
    assert!(cpu.status.contains(Status::I));
}

#[test]
fn irq_service_is_seven_cycles() {
    let mut bus = TraceBus::new();
    // CLI, NOP
    bus.load(RESET_AT, &[0x58, 0xEA, 0xEA]);
    let mut cpu = boot(&mut bus);

    step_instruction(&mut cpu, &mut bus); // CLI
    step_instruction(&mut cpu, &mut bus); // NOP (mask consumer)
    cpu.assert_irq();

    let start = cpu.cycles();
    // Entry sequence runs until the handler's first sync point
    while cpu.pc != IRQ_AT {
        cpu.step(&mut bus);
    }
    assert_eq!(cpu.cycles() - start, 7);
    assert!(cpu.sync());
}

#[test]
fn irq_is_level_sensitive() {
    let mut bus = TraceBus::new();
    // CLI, NOP; handler: NOP, RTI
    bus.load(RESET_AT, &[0x58, 0xEA, 0xEA, 0xEA]);
    let mut cpu = boot(&mut bus);
    bus.memory[(IRQ_AT + 1) as usize] = 0x40; // RTI after the first NOP

    step_instruction(&mut cpu, &mut bus); // CLI
    cpu.assert_irq();
    step_instruction(&mut cpu, &mut bus); // masked once
    step_instruction(&mut cpu, &mut bus); // service + handler NOP
    assert_eq!(cpu.pc, IRQ_AT + 1);

    // Release before RTI: after return, no re-entry
    cpu.release_irq();
    step_instruction(&mut cpu, &mut bus); // RTI
    assert_eq!(cpu.pc, RESET_AT + 2);
    step_instruction(&mut cpu, &mut bus); // NOP, uninterrupted
    assert_eq!(cpu.pc, RESET_AT + 3);
    assert!(!cpu.status.contains(Status::I)); // restored by RTI
}

#[test]
fn irq_reasserts_while_line_held() {
    let mut bus = TraceBus::new();
    bus.load(RESET_AT, &[0x58, 0xEA]);
    let mut cpu = boot(&mut bus);
    bus.memory[(IRQ_AT + 1) as usize] = 0x40; // RTI after the first NOP

    step_instruction(&mut cpu, &mut bus); // CLI
    cpu.assert_irq();
    step_instruction(&mut cpu, &mut bus); // masked once
    step_instruction(&mut cpu, &mut bus); // service + handler NOP
    step_instruction(&mut cpu, &mut bus); // RTI (I restored to 0)

    // Line still low: the next boundary re-enters the handler
    step_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, IRQ_AT + 1);
}

#[test]
fn nmi_is_edge_triggered() {
    let mut bus = TraceBus::new();
    bus.load(RESET_AT, &[0xEA, 0xEA, 0xEA, 0xEA]);
    let mut cpu = boot(&mut bus);
    bus.memory[(NMI_AT + 1) as usize] = 0x40; // RTI after the first NOP

    cpu.assert_nmi();
    step_instruction(&mut cpu, &mut bus); // service + handler NOP
    assert_eq!(cpu.pc, NMI_AT + 1);
    step_instruction(&mut cpu, &mut bus); // RTI

    // Line still asserted: no new edge, no re-entry
    cpu.assert_nmi();
    step_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, RESET_AT + 1);

    // Release then assert: a fresh edge fires again
    cpu.release_nmi();
    cpu.assert_nmi();
    step_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, NMI_AT + 1);
}

#[test]
fn nmi_wins_over_pending_irq() {
    let mut bus = TraceBus::new();
    bus.load(RESET_AT, &[0x58, 0xEA]);
    let mut cpu = boot(&mut bus);

    step_instruction(&mut cpu, &mut bus); // CLI
    step_instruction(&mut cpu, &mut bus); // NOP
    cpu.assert_irq();
    cpu.assert_nmi();
    step_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, NMI_AT + 1);
}

#[test]
fn nmi_ignores_i_flag() {
    let mut bus = TraceBus::new();
    bus.load(RESET_AT, &[0xEA, 0xEA]);
    let mut cpu = boot(&mut bus);
    assert!(cpu.status.contains(Status::I));

    cpu.assert_nmi();
    step_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, NMI_AT + 1);
}

#[test]
fn branch_taken_same_page_delays_irq_one_instruction() {
    let mut bus = TraceBus::new();
    // CLI, LDX #$01, BNE +2 (to $0207), [skipped: LDA #$BB], LDA #$AA, LDA #$CC
    bus.load(
        RESET_AT,
        &[0x58, 0xA2, 0x01, 0xD0, 0x02, 0xA9, 0xBB, 0xA9, 0xAA, 0xA9, 0xCC],
    );
    let mut cpu = boot(&mut bus);

    step_instruction(&mut cpu, &mut bus); // CLI
    step_instruction(&mut cpu, &mut bus); // LDX

    cpu.step(&mut bus); // BNE fetch
    cpu.assert_irq(); // line drops during T1
    while !cpu.sync() {
        cpu.step(&mut bus);
    }

    // The branch masked the poll: the target instruction still runs
    step_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.a, 0xAA);

    // Now the IRQ goes through; return address is the LDA #$CC
    step_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, IRQ_AT + 1);
    assert_eq!(bus.memory[0x01FC], 0x09); // PCL of $0209
}

#[test]
fn branch_page_cross_does_not_mask_irq() {
    let mut bus = TraceBus::new();
    // At $02F0: CLI, LDX #$01, BNE +$20 -> $0315 (page cross, 4 cycles)
    bus.load(0x02F0, &[0x58, 0xA2, 0x01, 0xD0, 0x20]);
    bus.memory[0x0315] = 0xA9; // LDA #$AA, never reached
    bus.memory[0x0316] = 0xAA;
    bus.memory[0xFFFC] = 0xF0;
    bus.memory[0xFFFD] = 0x02;
    let mut cpu = {
        bus.set_vectors(0x02F0, IRQ_AT, NMI_AT);
        for i in 0..16 {
            bus.memory[(IRQ_AT + i) as usize] = 0xEA;
        }
        let mut cpu = Cpu::new();
        for _ in 0..7 {
            cpu.step(&mut bus);
        }
        cpu
    };

    step_instruction(&mut cpu, &mut bus); // CLI
    step_instruction(&mut cpu, &mut bus); // LDX

    cpu.step(&mut bus); // BNE fetch
    cpu.assert_irq();
    while !cpu.sync() {
        cpu.step(&mut bus);
    }

    // Four-cycle branch polls normally: straight into the handler
    step_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, IRQ_AT + 1);
    assert_ne!(cpu.a, 0xAA);
    assert_eq!(bus.memory[0x01FC], 0x15); // PCL of the branch target
}

#[test]
fn brk_pushes_b_set_and_takes_irq_vector() {
    let mut bus = TraceBus::new();
    bus.load(RESET_AT, &[0x00, 0xFF]); // BRK + padding byte
    let mut cpu = boot(&mut bus);

    let cycles = step_instruction(&mut cpu, &mut bus);
    assert_eq!(cycles, 7 + 2); // BRK entry + first handler NOP
    assert_eq!(cpu.pc, IRQ_AT + 1);

    // Return address skips the padding byte
    assert_eq!(bus.memory[0x01FD], 0x02); // PCH
    assert_eq!(bus.memory[0x01FC], 0x02); // PCL of $0202
    let pushed = Status::from_bits_truncate(bus.memory[0x01FB]);
    assert!(pushed.contains(Status::B));
    assert!(pushed.contains(Status::U));
    assert!(cpu.status.contains(Status::I));
}

#[test]
fn nmi_during_brk_pushes_hijacks_vector_keeps_b() {
    let mut bus = TraceBus::new();
    bus.load(RESET_AT, &[0x00, 0xFF]);
    let mut cpu = boot(&mut bus);

    // T0 fetch, T1 padding, T2 push PCH - then the NMI edge arrives
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    cpu.assert_nmi();
    while !cpu.sync() {
        cpu.step(&mut bus);
    }

    // Vector morphed to NMI, but the pushed status still says BRK
    assert_eq!(cpu.pc, NMI_AT);
    let pushed = Status::from_bits_truncate(bus.memory[0x01FB]);
    assert!(pushed.contains(Status::B));

    // The edge was consumed: the handler is not re-entered
    step_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, NMI_AT + 1);
}

#[test]
fn irq_entry_pushes_unincremented_pc() {
    let mut bus = TraceBus::new();
    bus.load(RESET_AT, &[0x58, 0xEA]);
    let mut cpu = boot(&mut bus);
    bus.memory[(IRQ_AT + 1) as usize] = 0x40; // RTI after the first NOP

    step_instruction(&mut cpu, &mut bus); // CLI
    cpu.assert_irq();
    step_instruction(&mut cpu, &mut bus); // NOP, masked once
    step_instruction(&mut cpu, &mut bus); // service

    cpu.release_irq();
    step_instruction(&mut cpu, &mut bus); // RTI

    // Hardware entry did not consume an opcode: execution resumes exactly
    // where it left off
    assert_eq!(cpu.pc, RESET_AT + 2);
}

#[test]
fn jam_freezes_cpu_until_reset() {
    let mut bus = TraceBus::new();
    bus.load(RESET_AT, &[0x02]); // JAM
    let mut cpu = boot(&mut bus);

    cpu.step(&mut bus); // fetch locks the CPU
    assert!(cpu.is_jammed());
    assert!(cpu.halted());
    assert!(!cpu.sync());

    let pc = cpu.pc;
    let before = bus.trace.len();
    for _ in 0..5 {
        cpu.step(&mut bus);
    }
    // Each stalled cycle is still a bus read at PC; nothing advances
    assert_eq!(bus.trace.len() - before, 5);
    assert!(bus.trace[before..].iter().all(|a| *a == Access::Read(pc)));
    assert_eq!(cpu.pc, pc);
    assert!(cpu.is_jammed());

    // Even interrupts are dead; only reset recovers
    cpu.assert_nmi();
    cpu.step(&mut bus);
    assert!(cpu.is_jammed());

    cpu.reset();
    for _ in 0..7 {
        cpu.step(&mut bus);
    }
    assert!(!cpu.is_jammed());
    assert!(cpu.sync());
    assert_eq!(cpu.pc, RESET_AT);
}

#[test]
fn rdy_stalls_read_cycles_but_not_writes() {
    let mut bus = TraceBus::new();
    // LDA #$42, STA $10
    bus.load(RESET_AT, &[0xA9, 0x42, 0x85, 0x10]);
    let mut cpu = boot(&mut bus);

    // Stall on the opcode fetch: reads repeat, nothing advances
    cpu.set_rdy(false);
    let before = bus.trace.len();
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert!(cpu.halted());
    assert!(cpu.sync()); // still parked on the fetch
    assert_eq!(cpu.pc, RESET_AT);
    assert_eq!(bus.trace.len() - before, 2);
    assert!(bus.trace[before..]
        .iter()
        .all(|a| *a == Access::Read(RESET_AT)));

    // Release: execution resumes from the same stage
    cpu.set_rdy(true);
    assert!(!cpu.halted());
    step_instruction(&mut cpu, &mut bus); // LDA
    assert_eq!(cpu.a, 0x42);

    // STA: run fetch + address cycle, then stall before the write cycle
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    cpu.set_rdy(false);
    cpu.step(&mut bus);
    // The write cycle is not stallable: it completed
    assert_eq!(bus.memory[0x0010], 0x42);
    assert!(cpu.sync());
    // ... and the following fetch is
    cpu.step(&mut bus);
    assert!(cpu.halted());
    assert_eq!(cpu.pc, RESET_AT + 4);

    cpu.set_rdy(true);
    cpu.step(&mut bus);
    assert_eq!(cpu.pc, RESET_AT + 5);
}

#[test]
fn rdy_stall_still_counts_bus_cycles() {
    let mut bus = TraceBus::new();
    bus.load(RESET_AT, &[0xEA]);
    let mut cpu = boot(&mut bus);

    let start = cpu.cycles();
    cpu.set_rdy(false);
    for _ in 0..3 {
        cpu.step(&mut bus);
    }
    assert_eq!(cpu.cycles() - start, 3);
}

#[test]
fn set_so_is_immediate() {
    let mut bus = TraceBus::new();
    bus.load(RESET_AT, &[0xEA]);
    let mut cpu = boot(&mut bus);

    assert!(!cpu.status.contains(Status::V));
    cpu.set_so();
    assert!(cpu.status.contains(Status::V));
    // And unconditional: already-set stays set
    cpu.set_so();
    assert!(cpu.status.contains(Status::V));
}

#[test]
fn sync_marks_instruction_boundaries() {
    let mut bus = TraceBus::new();
    // LDA #$01 (2 cycles), STA $10 (3 cycles)
    bus.load(RESET_AT, &[0xA9, 0x01, 0x85, 0x10]);
    let mut cpu = boot(&mut bus);

    let mut pattern = Vec::new();
    for _ in 0..5 {
        pattern.push(cpu.sync());
        cpu.step(&mut bus);
    }
    pattern.push(cpu.sync());
    assert_eq!(pattern, [true, false, true, false, false, true]);
}

#[test]
fn rti_restores_status_from_stack() {
    let mut bus = TraceBus::new();
    // CLI, SEC, NOP; handler: CLC then RTI
    bus.load(RESET_AT, &[0x58, 0x38, 0xEA, 0xEA]);
    let mut cpu = boot(&mut bus);
    bus.memory[IRQ_AT as usize] = 0x18; // CLC
    bus.memory[(IRQ_AT + 1) as usize] = 0x40; // RTI

    step_instruction(&mut cpu, &mut bus); // CLI
    step_instruction(&mut cpu, &mut bus); // SEC
    cpu.assert_irq();
    // The CLI mask was consumed at SEC's boundary, so the next poll
    // services straight away; the handler's CLC runs
    step_instruction(&mut cpu, &mut bus);
    assert!(!cpu.status.contains(Status::C));
    assert_eq!(cpu.pc, IRQ_AT + 1);

    cpu.release_irq();
    step_instruction(&mut cpu, &mut bus); // RTI
    // Carry comes back from the pushed status
    assert!(cpu.status.contains(Status::C));
    assert!(!cpu.status.contains(Status::I));
    assert_eq!(cpu.pc, RESET_AT + 2);
}
