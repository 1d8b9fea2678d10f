//! Whole-system scenarios for the 32b family.

use pretty_assertions::assert_eq;

use super::cpu32::{Id32Model, Id32System};
use super::defs::*;
use super::selch::SCHC_GO;
use crate::StopReason;

fn sys() -> Id32System {
    let mut s = Id32System::new(Id32Model::M832);
    s.fab.init_devtab().unwrap();
    s.stop_inst = true;
    s
}

fn asm(s: &mut Id32System, org: u32, words: &[u32]) {
    let mut a = org;
    for &w in words {
        s.write_h(a, w, Rel::P).unwrap();
        a += 2;
    }
}

#[test]
fn test_load_immediate_fullword() {
    let mut s = sys();
    // LI R1,0x12345678
    asm(&mut s, 0x1000, &[0xF810, 0x1234, 0x5678]);
    s.pc = 0x1000;
    s.run(1);
    assert_eq!(s.r[1], 0x1234_5678);
    assert_eq!(s.psw & CC_MASK, CC_G);
    assert_eq!(s.pc, 0x1006);
}

#[test]
fn test_rx_addressing_forms() {
    let mut s = sys();
    s.write_f(0x2000, 0xCAFE_F00D, Rel::P).unwrap();
    // L R1,0x2000 (14-bit displacement)
    asm(&mut s, 0x1000, &[0x5810, 0x2000]);
    // L R2,rel (PC-relative: target - next PC)
    // next PC = 0x1008, disp = 0x2000 - 0x1008 = 0xFF8
    asm(&mut s, 0x1004, &[0x5820, 0x8000 | 0x0FF8]);
    // L R3,long absolute with 24-bit address
    asm(&mut s, 0x1008, &[0x5830, 0x4000, 0x2000]);
    s.pc = 0x1000;
    s.run(3);
    assert_eq!(s.r[1], 0xCAFE_F00D);
    assert_eq!(s.r[2], 0xCAFE_F00D);
    assert_eq!(s.r[3], 0xCAFE_F00D);
}

#[test]
fn test_add_fullword_overflow() {
    let mut s = sys();
    asm(&mut s, 0x1000, &[0xF810, 0x7FFF, 0xFFFF, 0xFA10, 0x0000, 0x0001]);
    s.pc = 0x1000;
    s.run(2);
    assert_eq!(s.r[1], 0x8000_0000);
    assert_eq!(s.psw & CC_MASK, CC_V | CC_L);
}

#[test]
fn test_multiply_divide_pair() {
    let mut s = sys();
    // R3 = 6, multiply by 7 -> R2:R3, then divide back by 7
    s.r[3] = 6;
    // LI R5,7 ; MR R2,R5 ; DR R2,R5
    asm(&mut s, 0x1000, &[0xF850, 0x0000, 0x0007, 0x1C25, 0x1D25]);
    s.pc = 0x1000;
    s.run(3);
    assert_eq!(s.r[2], 0); // remainder
    assert_eq!(s.r[3], 6); // quotient restored
}

#[test]
fn test_register_sets_switch_on_psw() {
    let mut s = sys();
    s.r[5] = 0xAAAA;
    // switch to register set 1
    s.new_psw(1 << PSW_V_REG);
    assert_eq!(s.r[5], 0);
    s.r[5] = 0xBBBB;
    // and back
    s.new_psw(0);
    assert_eq!(s.r[5], 0xAAAA);
    assert_eq!(s.reg_set(1, 5), 0xBBBB);
}

#[test]
fn test_mac_register_alias() {
    let mut s = sys();
    // segment registers live at their memory-mapped window when
    // relocation is off
    s.write_f(MAC_BASE + 8, 0xFFFF_FFFF, Rel::P).unwrap();
    let v = s.read_f(MAC_BASE + 8, Rel::P).unwrap();
    assert_eq!(v, SR_MASK);
    assert_eq!(s.mac_reg[2], SR_MASK);
}

#[test]
fn test_mac_status_read_clears() {
    let mut s = sys();
    s.mac_sta = MACS_WI;
    let v = s.read_f(MAC_STA, Rel::P).unwrap();
    assert_eq!(v, MACS_WI);
    assert_eq!(s.mac_sta, 0);
}

#[test]
fn test_mac_limit_fault_aborts() {
    let mut s = sys();
    // segment 0: present, minimum limit
    s.mac_reg[0] = SR_PRS;
    s.new_psw(PSW_REL);
    let r = s.read_h(0x2000, Rel::Vr);
    assert!(r.is_err());
    assert_eq!(s.mac_sta, MACS_L);
}

#[test]
fn test_mac_write_protect_and_translate() {
    let mut s = sys();
    // segment 0 maps to physical 0x10000, write protected
    s.mac_reg[0] = SR_PRS | SR_WRP | 0x10000 | SRL_MASK;
    s.fab.mem.io_write_h(0x10040, 0x5555);
    s.new_psw(PSW_REL);
    assert_eq!(s.read_h(0x40, Rel::Vr).unwrap(), 0x5555);
    assert!(s.write_h(0x40, 0, Rel::Vw).is_err());
    assert_eq!(s.mac_sta, MACS_WP);
}

#[test]
fn test_mac_fault_delivers_exception() {
    let mut s = sys();
    s.fab.mem.io_write_f(MPRPSW, 0); // new PSW: relocation off
    s.fab.mem.io_write_f(MPRPSW + 4, 0x3000); // new PC
    s.mac_reg[0] = SR_PRS; // minimum limit: offsets 0..0xFF only
    // L R1,0x2000 fetched from a valid page, operand out of bounds
    asm(&mut s, 0x80, &[0x5810, 0x2000]);
    s.new_psw(PSW_REL);
    s.pc = 0x80;
    s.run(2);
    assert_eq!(s.pc, 0x3000);
    // old PC (restored to instruction start on the 8/32) in R15
    assert_eq!(s.r[15], 0x80);
}

#[test]
fn test_immediate_interrupt_registers() {
    let mut s = sys();
    // even vector: immediate interrupt through register set switch
    s.fab.mem.io_write_h((INTSVT + 2 * D_LFC) & !1, 0x4000);
    let old_psw = s.psw;
    s.pc = 0x1234;
    let cc = s.int_auto(D_LFC, 0);
    assert_eq!(s.pc, 0x4000);
    assert_eq!(s.r[0], old_psw);
    assert_eq!(s.r[1], 0x1234);
    assert_eq!(s.r[2], D_LFC);
    assert_eq!(s.r[3], 0x80); // clock status byte
    assert_eq!(cc, 0);
}

#[test]
fn test_selch_dma_disk_read() {
    let mut s = sys();
    // sector 0 of drive 0 carries a recognizable pattern
    let mut img = vec![0u8; 0x40000];
    for (i, b) in img[..256].iter_mut().enumerate() {
        *b = i as u8;
    }
    img.resize(super::devices::dp::DpType::D5440.capacity(), 0);
    s.fab.devs.dp.attach(0, img).unwrap();

    // select drive 0, then program channel 0 for 0x1000..0x10FF
    s.fab.dev_io(D_DPC + O_DP0, IoOp::Adr, 0);
    for b in [0x00, 0x10, 0x00, 0x00, 0x10, 0xFF] {
        s.fab.dev_io(D_SCH, IoOp::Wd, b);
    }
    s.fab.dev_io(D_SCH, IoOp::Oc, SCHC_GO);
    // head/sector 0, controller read
    s.fab.dev_io(D_DPC, IoOp::Adr, 0);
    s.fab.dev_io(D_DPC, IoOp::Wd, 0);
    s.fab.dev_io(D_DPC, IoOp::Oc, 0x1);

    for _ in 0..64 {
        if !s.fab.sched.warp_to_next() {
            break;
        }
        s.fab.process_events().unwrap();
    }
    for i in 0..256u32 {
        assert_eq!(s.fab.mem.io_read_b(0x1000 + i), i & 0xFF, "byte {i}");
    }
    // the channel interrupt fired and GO dropped
    assert!(s.fab.ints.req_set(V_SCH));
    assert!(!s.fab.selch.go(0));
    // and the controller posted completion
    assert!(s.fab.ints.req_set(V_DPC));
}

#[test]
fn test_selch_blocks_programmed_io() {
    let mut s = sys();
    let img = vec![0u8; super::devices::dp::DpType::D5440.capacity()];
    s.fab.devs.dp.attach(0, img).unwrap();
    for b in [0x00, 0x10, 0x00, 0x00, 0x10, 0xFF] {
        s.fab.dev_io(D_SCH, IoOp::Wd, b);
    }
    s.fab.dev_io(D_SCH, IoOp::Oc, SCHC_GO);
    assert!(!s.fab.dev_acc(D_DPC));
    assert!(s.fab.dev_acc(D_TT));
}

#[test]
fn test_bit_instructions() {
    let mut s = sys();
    s.write_h(0x2000, 0x0000, Rel::P).unwrap();
    // SBT R1,0x2000 ; TBT R1,0x2000
    asm(&mut s, 0x1000, &[0x7510, 0x2000, 0x7410, 0x2000]);
    s.r[1] = 3; // bit 3 of the halfword
    s.pc = 0x1000;
    s.run(2);
    assert_eq!(s.read_h(0x2000, Rel::P).unwrap(), 0x1000);
    assert_eq!(s.psw & CC_MASK, CC_G);
}

#[test]
fn test_crc16_instruction() {
    let mut s = sys();
    s.write_h(0x2000, 0, Rel::P).unwrap();
    // CRC16 R1,0x2000 with R1 = 0x41
    asm(&mut s, 0x1000, &[0x5F10, 0x2000]);
    s.r[1] = 0x41;
    s.pc = 0x1000;
    s.run(1);
    // one step of the reflected CRC-16 polynomial over 0x41
    let mut t = 0x41u32;
    for _ in 0..8 {
        t = if t & 1 != 0 { (t >> 1) ^ 0xA001 } else { t >> 1 };
    }
    assert_eq!(s.read_h(0x2000, Rel::P).unwrap(), t);
}

#[test]
fn test_ts_sets_msb() {
    let mut s = sys();
    s.write_h(0x2000, 0x0001, Rel::P).unwrap();
    asm(&mut s, 0x1000, &[0xE010, 0x2000]); // TS R1,0x2000
    s.pc = 0x1000;
    s.run(1);
    assert_eq!(s.read_h(0x2000, Rel::P).unwrap(), 0x8001);
    assert_eq!(s.psw & CC_MASK, CC_G);
}

#[test]
fn test_svc_parameter_in_r13() {
    let mut s = sys();
    s.fab.mem.io_write_f(SVNPS32, 0);
    s.fab.mem.io_write_h(SVNPC + 4, 0x5000); // SVC 2
    asm(&mut s, 0x1000, &[0xE120, 0x2345]); // SVC 2,0x2345
    s.pc = 0x1000;
    s.run(1);
    assert_eq!(s.r[13], 0x2345);
    assert_eq!(s.r[15], 0x1004);
    assert_eq!(s.pc, 0x5000);
}

#[test]
fn test_tlate_direct_and_branch() {
    // the RXF operand is the table pointer; entries with the sign bit
    // translate directly, the rest branch
    let mut s = sys();
    s.write_f(0x2800, 0x3000, Rel::P).unwrap();
    s.write_h(0x3000 + 4, 0x8099, Rel::P).unwrap(); // byte 2: direct 0x99
    s.write_h(0x3000 + 6, 0x1000, Rel::P).unwrap(); // byte 3: branch 0x2000
    asm(&mut s, 0x1000, &[0xE710, 0x2800]);
    s.r[1] = 2;
    s.pc = 0x1000;
    s.run(1);
    assert_eq!(s.r[1], 0x99);

    let mut s = sys();
    s.write_f(0x2800, 0x3000, Rel::P).unwrap();
    s.write_h(0x3000 + 6, 0x1000, Rel::P).unwrap();
    asm(&mut s, 0x1000, &[0xE710, 0x2800]);
    s.r[1] = 3;
    s.pc = 0x1000;
    s.run(1);
    assert_eq!(s.pc, 0x2000);
}

#[test]
fn test_wait_stop() {
    let mut s = sys();
    s.fab.sched.clear();
    s.new_psw(PSW_WAIT);
    assert_eq!(s.run(10), StopReason::Wait);
}
