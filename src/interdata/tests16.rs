//! Whole-system scenarios for the 16b family.

use pretty_assertions::assert_eq;

use super::cpu16::{Id16Model, Id16System};
use super::defs::*;
use crate::StopReason;

fn sys() -> Id16System {
    let mut s = Id16System::new(Id16Model::M716);
    s.fab.init_devtab().unwrap();
    s.stop_inst = true;
    s
}

/// Assemble halfwords at an address
fn asm(s: &mut Id16System, org: u32, words: &[u32]) {
    let mut a = org;
    for &w in words {
        s.write_h(a, w);
        a += 2;
    }
}

#[test]
fn test_load_and_add_set_cc() {
    let mut s = sys();
    // LHI R1,0x7FFF; AHI R1,1
    asm(&mut s, 0x100, &[0xC810, 0x7FFF, 0xCA10, 0x0001]);
    s.pc = 0x100;
    s.run(2);
    assert_eq!(s.r[1], 0x8000);
    // signed overflow at the positive boundary: V and L, no carry, no Z
    assert_eq!(s.psw & CC_MASK, CC_V | CC_L);
}

#[test]
fn test_add_carry_wraps() {
    let mut s = sys();
    // LHI R1,0xFFFF (sign-extended imm); AHI R1,1
    asm(&mut s, 0x100, &[0xC810, 0xFFFF, 0xCA10, 0x0001]);
    s.pc = 0x100;
    s.run(2);
    assert_eq!(s.r[1], 0);
    // carry out, wrap to zero: C set, G/L clear
    assert_eq!(s.psw & CC_MASK, CC_C);
}

#[test]
fn test_bal_and_return() {
    let mut s = sys();
    // 0x100: BAL R2,0x200 ; 0x200: BFCR 0,R2 (unconditional branch to R2)
    asm(&mut s, 0x100, &[0x4120, 0x0200]);
    asm(&mut s, 0x200, &[0x0302]);
    s.pc = 0x100;
    s.run(2);
    // the link register holds the post-branch PC and the return restores it
    assert_eq!(s.r[2], 0x104);
    assert_eq!(s.pc, 0x104);
    // both control transfers went through the PC queue
    let q = s.pc_queue();
    assert!(q.contains(&0x100));
    assert!(q.contains(&0x200));
}

#[test]
fn test_svc_saves_and_vectors() {
    let mut s = sys();
    s.write_h(SVNPS, 0x0002); // new PSW
    s.write_h(SVNPC + 10, 0x2000); // new PC for SVC 5
    asm(&mut s, 0x100, &[0xE150, 0x1234]); // SVC 5,0x1234
    s.pc = 0x100;
    s.run(1);
    assert_eq!(s.read_h(SVCAP), 0x1234);
    assert_eq!(s.read_h(SVOPS), 0); // old PSW, CC clear
    assert_eq!(s.read_h(SVOPC), 0x104);
    assert_eq!(s.pc, 0x2000);
    assert_eq!(s.psw & CC_MASK, CC_G);
}

#[test]
fn test_illegal_op_swaps_psw() {
    let mut s = sys();
    s.stop_inst = false;
    s.write_h(ILOPSW + 4, 0x0000); // new PSW
    s.write_h(ILOPSW + 6, 0x3000); // new PC
    asm(&mut s, 0x100, &[0x0000]); // undefined opcode
    s.pc = 0x100;
    s.run(1);
    assert_eq!(s.pc, 0x3000);
    assert_eq!(s.read_h(ILOPSW + 2), 0x100); // old PC saved
}

#[test]
fn test_privileged_traps_in_protect_mode() {
    let mut s = sys();
    s.write_h(ILOPSW + 6, 0x3000);
    s.new_psw(PSW_PRO);
    asm(&mut s, 0x100, &[0x9E12]); // OCR, privileged
    s.pc = 0x100;
    s.run(1);
    assert_eq!(s.pc, 0x3000);
}

#[test]
fn test_divide_by_zero_faults_when_enabled() {
    let mut s = sys();
    s.write_h(AFIPSW + 6, 0x4000); // AFI new PC
    s.new_psw(PSW_AFI);
    // LHI R3,0 ; DHR R2,R3
    asm(&mut s, 0x100, &[0xC830, 0x0000, 0x0D23]);
    s.r[2] = 0x1234;
    s.pc = 0x100;
    s.run(2);
    assert_eq!(s.pc, 0x4000);
    // the dividend registers are untouched
    assert_eq!(s.r[2], 0x1234);
}

#[test]
fn test_divide_by_zero_silent_when_disabled() {
    let mut s = sys();
    asm(&mut s, 0x100, &[0xC830, 0x0000, 0x0D23]);
    s.r[2] = 0x1234;
    s.pc = 0x100;
    s.run(2);
    assert_eq!(s.pc, 0x106);
    assert_eq!(s.r[2], 0x1234);
}

#[test]
fn test_queue_instructions_roundtrip() {
    let mut s = sys();
    // list header at 0x600: 4 slots, 0 used
    s.write_h(0x600, 0x0400);
    s.write_b(0x602, 0);
    s.write_b(0x603, 0);
    // ATL R1,0x600 ; RBL R2,0x600
    asm(&mut s, 0x100, &[0x6410, 0x0600, 0x6720, 0x0600]);
    s.r[1] = 0xBEEF;
    s.pc = 0x100;
    s.run(2);
    assert_eq!(s.r[2], 0xBEEF);
    // queue drained again
    assert_eq!(s.read_b(0x600 + Q16_USD), 0);
}

#[test]
fn test_queue_full_sets_v() {
    let mut s = sys();
    s.write_h(0x600, 0x0101); // 1 slot, 1 used
    asm(&mut s, 0x100, &[0x6410, 0x0600]);
    s.pc = 0x100;
    s.run(1);
    assert_eq!(s.psw & CC_MASK, CC_V);
}

#[test]
fn test_block_read_from_paper_tape() {
    let mut s = sys();
    s.fab.devs.pt.attach_reader(vec![0x41, 0x42, 0x43]);
    // LHI R1,dev ; LHI R2,cmd(run+slew+read+enable) ; OCR R1,R2 ;
    // LHI R4,0x500 ; LHI R5,0x502 ; RBR R1,R4
    asm(
        &mut s,
        0x100,
        &[
            0xC810, D_PT, 0xC820, 0x0055, 0x9E12, 0xC840, 0x0500, 0xC850, 0x0502, 0x9714,
        ],
    );
    s.pc = 0x100;
    let r = s.run(100_000);
    // transfer completed, then the fetch at 0x114 hit a zero opcode
    assert_eq!(r, StopReason::IllegalInstruction);
    assert_eq!(s.read_b(0x500), 0x41);
    assert_eq!(s.read_b(0x501), 0x42);
    assert_eq!(s.read_b(0x502), 0x43);
}

#[test]
fn test_console_break_status_and_interrupt() {
    let mut s = sys();
    // enable + leave in read mode
    s.fab.dev_io(D_TT, IoOp::Oc, CMD_IENB << CMD_V_INT);
    s.fab.devs.tt.queue_break();
    while s.fab.sched.warp_to_next() {
        s.fab.process_events().unwrap();
        if s.fab.ints.req_set(V_TT) {
            break;
        }
    }
    assert!(s.fab.ints.req_set(V_TT));
    let sta = s.fab.dev_io(D_TT, IoOp::Ss, 0);
    assert_eq!(sta & 0x24, 0x24); // break + examine
    assert_eq!(s.fab.dev_io(D_TT, IoOp::Rd, 0), 0);
}

#[test]
fn test_auto_interrupt_ccw_read() {
    let mut s = sys();
    s.fab.devs.pt.attach_reader(vec![0x11, 0x22]);
    // start the reader: run + slew + read mode
    s.fab.dev_io(D_PT, IoOp::Adr, 0);
    s.fab.dev_io(D_PT, IoOp::Oc, 0x15);
    // let a byte arrive so status is clean
    while s.fab.sched.warp_to_next() {
        s.fab.process_events().unwrap();
        if s.fab.dev_io(D_PT, IoOp::Ss, 0) & 0xF == 0 {
            break;
        }
    }
    // CCB at 0x700: read 1 byte per interrupt into 0x720..0x720
    let ccb = 0x700u32;
    s.write_h(INTSVT + 2 * D_PT, ccb | 1);
    s.write_h(ccb, (CCW16_RD << CCW16_V_FNC) | 1); // RD, bpi=1
    s.write_h(ccb + 2, 0x720); // start
    s.write_h(ccb + 4, 0x720); // end
    let cc = s.int_auto(D_PT, 0);
    assert_eq!(s.read_b(0x720), 0x11);
    // buffer exhausted: CCW went NOP, device/status posted
    assert_ne!(s.read_h(ccb) & CCW16_NOP, 0);
    assert_eq!(s.read_h(ccb - 2) >> 8, D_PT);
    assert_eq!(cc, 0);
}

#[test]
fn test_setm_relocation_on_816e() {
    let mut s = Id16System::new(Id16Model::M816E);
    s.fab.init_devtab().unwrap();
    s.stop_inst = true;
    // map 1 relocates the high segment to physical 0x8000 + 0x8000
    s.fab.mem.io_write_h(0x10000, 0xABCD);
    s.new_psw(1 << PSW_V_MAP);
    assert_eq!(s.read_h(0x8000), 0xABCD);
    // map 0 is identity
    s.new_psw(0);
    assert_eq!(s.read_h(0x8000), 0);
}

#[test]
fn test_examine_deposit_roundtrip() {
    let mut s = sys();
    s.write_h(0x500, 0x1234);
    assert_eq!(s.read_h(0x500), 0x1234);
    s.write_b(0x500, 0x56);
    assert_eq!(s.read_h(0x500), 0x5634);
}

#[test]
fn test_run_wait_state_with_empty_queue() {
    let mut s = sys();
    // cancel everything the devices scheduled, then wait
    s.fab.sched.clear();
    s.new_psw(PSW_WAIT);
    assert_eq!(s.run(100), StopReason::Wait);
}
