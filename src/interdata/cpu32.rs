//! Interdata 32b CPU (7/32 and 8/32).
//!
//! Sixteen general registers per register set (two sets on the 7/32,
//! eight on the 8/32, selected by PSW bits), hex floating point in
//! hardware, a 20-bit program counter, and the MAC relocation/protection
//! unit: sixteen segment registers giving 4 KiB-granularity translation
//! when PSW bit REL is set. MAC faults abort the instruction in flight;
//! the abort propagates out of every memory accessor as a `Result` and
//! the main loop delivers the memory-protect exception, restoring the
//! instruction-start PC on the 8/32.
//!
//! Interrupt delivery always runs through the auto-driven channel: the
//! service vector either names an immediate handler or points at a
//! channel control block executed in fast or slow mode, with optional
//! character translation and CRC accumulation.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use super::defs::*;
use super::fp::{self, Ufp};
use super::IdFabric;
use crate::StopReason;

const PCQ_SIZE: usize = 64;
const PCQ_MASK: usize = PCQ_SIZE - 1;
const VAMASK: u32 = VAMASK32;
const NRSETS: usize = 8;

/// MAC abort: unwinds the instruction in flight back to the main loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAbort;

type MemResult = Result<u32, MacAbort>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Id32Model {
    /// 7/32, two register sets, optional double precision FP
    M732,
    /// 8/32, eight register sets, double precision FP
    M832,
}

/// Instruction decode ROM
#[rustfmt::skip]
const DECROM: [u16; 256] = [
    0,                                                  /* 00 */
    OP_RR,                                              /* BALR */
    OP_RR,                                              /* BTCR */
    OP_RR,                                              /* BFCR */
    OP_RR,                                              /* NR */
    OP_RR,                                              /* CLR */
    OP_RR,                                              /* OR */
    OP_RR,                                              /* XR */
    OP_RR,                                              /* LR */
    OP_RR,                                              /* CR */
    OP_RR,                                              /* AR */
    OP_RR,                                              /* SR */
    OP_RR,                                              /* MHR */
    OP_RR,                                              /* DHR */
    0, 0,                                               /* 0E:0F */
    OP_NO,                                              /* SRLS */
    OP_NO,                                              /* SLLS */
    OP_RR,                                              /* CHVR */
    0, 0, 0, 0, 0,                                      /* 13:17 */
    OP_RR | OP_PRV,                                     /* LPSWR */
    0, 0, 0,                                            /* 19:1B */
    OP_RR,                                              /* MR */
    OP_RR,                                              /* DR */
    0, 0,                                               /* 1E:1F */
    OP_NO,                                              /* BTBS */
    OP_NO,                                              /* BTFS */
    OP_NO,                                              /* BFBS */
    OP_NO,                                              /* BFFS */
    OP_NO,                                              /* LIS */
    OP_NO,                                              /* LCS */
    OP_NO,                                              /* AIS */
    OP_NO,                                              /* SIS */
    OP_NO,                                              /* LER */
    OP_NO,                                              /* CER */
    OP_NO,                                              /* AER */
    OP_NO,                                              /* SER */
    OP_NO,                                              /* MER */
    OP_NO,                                              /* DER */
    OP_NO,                                              /* FXR */
    OP_NO,                                              /* FLR */
    0, 0, 0, 0,                                         /* 30:33 */
    OP_RR,                                              /* EXHR */
    0, 0, 0,                                            /* 35:37 */
    OP_NO | OP_DPF,                                     /* LDR */
    OP_NO | OP_DPF,                                     /* CDR */
    OP_NO | OP_DPF,                                     /* ADR */
    OP_NO | OP_DPF,                                     /* SDR */
    OP_NO | OP_DPF,                                     /* MDR */
    OP_NO | OP_DPF,                                     /* DDR */
    OP_NO | OP_DPF,                                     /* FXDR */
    OP_NO | OP_DPF,                                     /* FLDR */
    OP_RX,                                              /* STH */
    OP_RX,                                              /* BAL */
    OP_RX,                                              /* BTC */
    OP_RX,                                              /* BFC */
    OP_RXH,                                             /* NH */
    OP_RXH,                                             /* CLH */
    OP_RXH,                                             /* OH */
    OP_RXH,                                             /* XH */
    OP_RXH,                                             /* LH */
    OP_RXH,                                             /* CH */
    OP_RXH,                                             /* AH */
    OP_RXH,                                             /* SH */
    OP_RXH,                                             /* MH */
    OP_RXH,                                             /* DH */
    0, 0,                                               /* 4E:4F */
    OP_RX,                                              /* ST */
    OP_RXF,                                             /* AM */
    0, 0,                                               /* 52:53 */
    OP_RXF,                                             /* N */
    OP_RXF,                                             /* CL */
    OP_RXF,                                             /* O */
    OP_RXF,                                             /* X */
    OP_RXF,                                             /* L */
    OP_RXF,                                             /* C */
    OP_RXF,                                             /* A */
    OP_RXF,                                             /* S */
    OP_RXF,                                             /* M */
    OP_RXF,                                             /* D */
    OP_RXH,                                             /* CRC12 */
    OP_RXH,                                             /* CRC16 */
    OP_RX,                                              /* STE */
    OP_RXH,                                             /* AHM */
    0,                                                  /* 62 */
    OP_RX,                                              /* LRA */
    OP_RX,                                              /* ATL */
    OP_RX,                                              /* ABL */
    OP_RX,                                              /* RTL */
    OP_RX,                                              /* RBL */
    OP_RX,                                              /* LE */
    OP_RX,                                              /* CE */
    OP_RX,                                              /* AE */
    OP_RX,                                              /* SE */
    OP_RX,                                              /* ME */
    OP_RX,                                              /* DE */
    0, 0,                                               /* 6E:6F */
    OP_RX | OP_DPF,                                     /* STD */
    OP_RX,                                              /* STME */
    OP_RX,                                              /* LME */
    OP_RXH,                                             /* LHL */
    OP_RX,                                              /* TBT */
    OP_RX,                                              /* SBT */
    OP_RX,                                              /* RBT */
    OP_RX,                                              /* CBT */
    OP_RX | OP_DPF,                                     /* LD */
    OP_RX | OP_DPF,                                     /* CD */
    OP_RX | OP_DPF,                                     /* AD */
    OP_RX | OP_DPF,                                     /* SD */
    OP_RX | OP_DPF,                                     /* MD */
    OP_RX | OP_DPF,                                     /* DD */
    OP_RX | OP_DPF,                                     /* STMD */
    OP_RX | OP_DPF,                                     /* LMD */
    0, 0, 0, 0, 0, 0, 0, 0,                             /* 80:8F */
    0, 0, 0, 0, 0, 0, 0, 0,
    OP_NO,                                              /* SRHLS */
    OP_NO,                                              /* SLHLS */
    OP_NO,                                              /* STBR */
    OP_RR,                                              /* LDBR */
    OP_RR,                                              /* EXBR */
    OP_NO | OP_PRV,                                     /* EPSR */
    OP_RR | OP_PRV,                                     /* WBR */
    OP_RR | OP_PRV,                                     /* RBR */
    OP_RR | OP_PRV,                                     /* WHR */
    OP_RR | OP_PRV,                                     /* RHR */
    OP_RR | OP_PRV,                                     /* WDR */
    OP_RR | OP_PRV,                                     /* RDR */
    0,                                                  /* 9C */
    OP_RR | OP_PRV,                                     /* SSR */
    OP_RR | OP_PRV,                                     /* OCR */
    0,                                                  /* 9F */
    0, 0, 0, 0, 0, 0, 0, 0,                             /* A0:AF */
    0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0,                             /* B0:BF */
    0, 0, 0, 0, 0, 0, 0, 0,
    OP_RX,                                              /* BXH */
    OP_RX,                                              /* BXLE */
    OP_RXF | OP_PRV,                                    /* LPSW */
    OP_RI1,                                             /* THI */
    OP_RI1,                                             /* NHI */
    OP_RI1,                                             /* CLHI */
    OP_RI1,                                             /* OHI */
    OP_RI1,                                             /* XHI */
    OP_RI1,                                             /* LHI */
    OP_RI1,                                             /* CHI */
    OP_RI1,                                             /* AHI */
    OP_RI1,                                             /* SHI */
    OP_RI1,                                             /* SRHL */
    OP_RI1,                                             /* SLHL */
    OP_RI1,                                             /* SRHA */
    OP_RI1,                                             /* SLHA */
    OP_RX,                                              /* STM */
    OP_RX,                                              /* LM */
    OP_RX,                                              /* STB */
    OP_RXB,                                             /* LDB */
    OP_RXB,                                             /* CLB */
    OP_RX | OP_PRV,                                     /* AL */
    OP_RXF | OP_PRV,                                    /* WB */
    OP_RXF | OP_PRV,                                    /* RB */
    OP_RX | OP_PRV,                                     /* WH */
    OP_RX | OP_PRV,                                     /* RH */
    OP_RX | OP_PRV,                                     /* WD */
    OP_RX | OP_PRV,                                     /* RD */
    0,                                                  /* DC */
    OP_RX | OP_PRV,                                     /* SS */
    OP_RX | OP_PRV,                                     /* OC */
    0,                                                  /* DF */
    OP_RXH,                                             /* TS */
    OP_RX,                                              /* SVC */
    OP_RI1 | OP_PRV,                                    /* SINT */
    OP_RXH | OP_PRV,                                    /* SCP */
    0, 0,                                               /* E4:E5 */
    OP_RX,                                              /* LA */
    OP_RXF,                                             /* TLATE */
    0, 0,                                               /* E8:E9 */
    OP_RI1,                                             /* RRL */
    OP_RI1,                                             /* RLL */
    OP_RI1,                                             /* SRL */
    OP_RI1,                                             /* SLL */
    OP_RI1,                                             /* SRA */
    OP_RI1,                                             /* SLA */
    0, 0, 0,                                            /* F0:F2 */
    OP_RI2,                                             /* TI */
    OP_RI2,                                             /* NI */
    OP_RI2,                                             /* CLI */
    OP_RI2,                                             /* OI */
    OP_RI2,                                             /* XI */
    OP_RI2,                                             /* LI */
    OP_RI2,                                             /* CI */
    OP_RI2,                                             /* AI */
    OP_RI2,                                             /* SI */
    0, 0, 0, 0,                                         /* FC:FF */
];

/// Instruction history entry
#[derive(Debug, Clone, Copy, Default)]
pub struct Hist32 {
    pub valid: bool,
    pub pc: u32,
    pub ir1: u32,
    pub ir2: u32,
    pub ir3: u32,
    pub r1: u32,
    pub ea: u32,
    pub opnd: u32,
}

#[derive(Debug)]
pub struct Id32System {
    pub fab: IdFabric,
    model: Id32Model,
    /// Double precision FP present
    pub dp_fp: bool,
    /// Eight register sets instead of two
    eight_rs: bool,
    dec_flgs: u16,
    /// All register sets; the active one is cached in `r`
    greg: [u32; 16 * NRSETS],
    /// Active register set (cached copy of `greg[rs]`)
    pub r: [u32; 16],
    rs: usize,
    pub fregs: [u32; 8],
    pub dregs: [(u32, u32); 8],
    pub psw: u32,
    pub pc: u32,
    /// PC at the start of the current instruction
    o_pc: u32,
    pub mac_reg: [u32; MAC_LNT],
    pub mac_sta: u32,
    qevent: u32,
    blk: BlockIo,
    pub stop_inst: bool,
    pcq: [u32; PCQ_SIZE],
    pcq_p: usize,
    hist: Vec<Hist32>,
    hist_p: usize,
    breakpoints: BTreeSet<u32>,
    devtab_ok: bool,
}

impl Id32System {
    pub fn new(model: Id32Model) -> Self {
        let mut sys = Self {
            fab: IdFabric::new(PAWIDTH32, MAXMEMSIZE32, 4, true),
            model,
            dp_fp: model == Id32Model::M832,
            eight_rs: model == Id32Model::M832,
            dec_flgs: 0,
            greg: [0; 16 * NRSETS],
            r: [0; 16],
            rs: 0,
            fregs: [0; 8],
            dregs: [(0, 0); 8],
            psw: 0,
            pc: 0,
            o_pc: 0,
            mac_reg: [0; MAC_LNT],
            mac_sta: 0,
            qevent: 0,
            blk: BlockIo::default(),
            stop_inst: false,
            pcq: [0; PCQ_SIZE],
            pcq_p: 0,
            hist: Vec::new(),
            hist_p: 0,
            breakpoints: BTreeSet::new(),
            devtab_ok: false,
        };
        sys.reset();
        sys
    }

    pub fn model(&self) -> Id32Model {
        self.model
    }

    /// Select two or eight register sets (the 8/32 shipped either way)
    pub fn set_register_sets(&mut self, eight: bool) {
        self.eight_rs = eight;
    }

    fn psw_reg_mask(&self) -> u32 {
        if self.eight_rs {
            7
        } else {
            1
        }
    }

    pub fn reset(&mut self) {
        self.qevent = 0;
        self.mac_sta = 0;
        self.new_psw(0);
        self.blk = BlockIo::default();
        self.fab.reset_io();
    }

    pub fn set_breakpoint(&mut self, pc: u32) {
        self.breakpoints.insert(pc & VAMASK);
    }

    pub fn clear_breakpoint(&mut self, pc: u32) {
        self.breakpoints.remove(&(pc & VAMASK));
    }

    pub fn set_history(&mut self, n: usize) {
        self.hist = vec![Hist32::default(); n];
        self.hist_p = 0;
    }

    pub fn history(&self) -> impl Iterator<Item = &Hist32> {
        let split = self.hist_p;
        self.hist[split..]
            .iter()
            .chain(self.hist[..split].iter())
            .filter(|h| h.valid)
    }

    pub fn pc_queue(&self) -> [u32; PCQ_SIZE] {
        self.pcq
    }

    /// Register from a specific set (the active set reads the cache)
    pub fn reg_set(&self, set: usize, i: usize) -> u32 {
        if set == self.rs {
            self.r[i]
        } else {
            self.greg[set * 16 + i]
        }
    }

    /* Relocation and protection */

    fn reloc(&mut self, va: u32, rel: Rel) -> MemResult {
        let seg = va_get_seg(va) as usize;
        let off = va_get_off(va);
        let mapr = self.mac_reg[seg];
        if off >= get_srl(mapr) {
            self.mac_sta = MACS_L;
            self.qevent |= EV_MAC;
            return Err(MacAbort);
        }
        if mapr & SR_PRS == 0 {
            self.mac_sta = MACS_NP;
            self.qevent |= EV_MAC;
            return Err(MacAbort);
        }
        if rel == Rel::Ve && mapr & SR_EXP != 0 {
            // execute protect: post-instruction delivery
            self.mac_sta = MACS_EX;
            self.qevent |= EV_MAC;
        }
        if rel == Rel::Vw && mapr & (SR_WPI | SR_WRP) != 0 {
            if mapr & SR_WRP != 0 {
                self.mac_sta = MACS_WP;
                self.qevent |= EV_MAC;
                return Err(MacAbort);
            }
            self.mac_sta = MACS_WI;
            self.qevent |= EV_MAC;
        }
        Ok((off + (mapr & SRF_MASK)) & PAMASK32)
    }

    /// Translation test (LRA): no faults, returns CCs and the physical
    /// address through `pa`
    fn reloc_test(&mut self, va: u32, base: u32, rel: Rel) -> (u32, Option<u32>) {
        let seg = va_get_seg(va);
        let off = va_get_off(va);
        let mapr = match self.read_f((base + (seg << 2)) & VAMASK, rel) {
            Ok(v) => v,
            Err(_) => return (CC_C, None),
        };
        if off >= get_srl(mapr) {
            return (CC_C, None);
        }
        if mapr & SR_PRS == 0 {
            return (CC_V, None);
        }
        let pa = off + (mapr & SRF_MASK);
        if mapr & (SR_WRP | SR_WPI) != 0 {
            return (CC_G, Some(pa));
        }
        if mapr & SR_EXP != 0 {
            return (CC_L, Some(pa));
        }
        (0, Some(pa))
    }

    /* Memory access. With relocation off, the low MAC window aliases the
       segment registers and the MAC status; reading the status clears it
       and the pending MAC event. */

    fn mac_alias_read(&mut self, loc: u32) -> Option<u32> {
        if loc & !3 == MAC_STA {
            let val = self.mac_sta;
            self.mac_sta = 0;
            self.qevent &= !EV_MAC;
            return Some(val);
        }
        if (MAC_BASE..MAC_STA).contains(&loc) {
            return Some(self.mac_reg[((loc - MAC_BASE) >> 2) as usize]);
        }
        None
    }

    pub fn read_b(&mut self, loc: u32, rel: Rel) -> MemResult {
        let sc = (3 - (loc & 3)) << 3;
        let val = if self.psw & PSW_REL == 0 {
            match self.mac_alias_read(loc) {
                Some(v) => v,
                None => self.fab.mem.io_read_f(loc & !3),
            }
        } else if rel == Rel::P {
            self.fab.mem.io_read_f(loc & !3)
        } else {
            let pa = self.reloc(loc, rel)?;
            self.fab.mem.io_read_f(pa & !3)
        };
        Ok((val >> sc) & DMASK8)
    }

    pub fn read_h(&mut self, loc: u32, rel: Rel) -> MemResult {
        let sc = if loc & 2 != 0 { 0 } else { 16 };
        let val = if self.psw & PSW_REL == 0 {
            match self.mac_alias_read(loc) {
                Some(v) => v,
                None => self.fab.mem.io_read_f(loc & !3),
            }
        } else if rel == Rel::P {
            self.fab.mem.io_read_f(loc & !3)
        } else {
            let pa = self.reloc(loc, rel)?;
            self.fab.mem.io_read_f(pa & !3)
        };
        Ok((val >> sc) & DMASK16)
    }

    pub fn read_f(&mut self, loc: u32, rel: Rel) -> MemResult {
        let val = if self.psw & PSW_REL == 0 {
            match self.mac_alias_read(loc) {
                Some(v) => v,
                None => self.fab.mem.io_read_f(loc & !3),
            }
        } else if rel == Rel::P {
            self.fab.mem.io_read_f(loc & !3)
        } else {
            let pa = self.reloc(loc, rel)?;
            self.fab.mem.io_read_f(pa & !3)
        };
        Ok(val)
    }

    /// Write through the MAC-register alias. Returns true if handled.
    fn mac_alias_write(&mut self, loc: u32, val: u32, width: u32) -> bool {
        if self.psw & PSW_REL != 0 {
            return false;
        }
        if loc & !3 == MAC_STA {
            self.mac_sta = 0;
            self.qevent &= !EV_MAC;
            return true;
        }
        if (MAC_BASE..MAC_STA).contains(&loc) {
            let idx = ((loc - MAC_BASE) >> 2) as usize;
            let old = self.mac_reg[idx];
            let new = match width {
                1 => {
                    let sc = (3 - (loc & 3)) << 3;
                    (old & !(DMASK8 << sc)) | ((val & DMASK8) << sc)
                }
                2 => {
                    if loc & 2 != 0 {
                        (old & !DMASK16) | (val & DMASK16)
                    } else {
                        (old & DMASK16) | ((val & DMASK16) << 16)
                    }
                }
                _ => val,
            };
            self.mac_reg[idx] = new & SR_MASK;
            return true;
        }
        false
    }

    pub fn write_b(&mut self, loc: u32, val: u32, rel: Rel) -> Result<(), MacAbort> {
        if self.mac_alias_write(loc, val, 1) {
            return Ok(());
        }
        let pa = if self.psw & PSW_REL != 0 && rel != Rel::P {
            self.reloc(loc, rel)?
        } else {
            loc
        };
        self.fab.mem.io_write_b(pa, val & DMASK8);
        Ok(())
    }

    pub fn write_h(&mut self, loc: u32, val: u32, rel: Rel) -> Result<(), MacAbort> {
        if self.mac_alias_write(loc, val, 2) {
            return Ok(());
        }
        let pa = if self.psw & PSW_REL != 0 && rel != Rel::P {
            self.reloc(loc, rel)?
        } else {
            loc
        };
        self.fab.mem.io_write_h(pa & !1, val & DMASK16);
        Ok(())
    }

    pub fn write_f(&mut self, loc: u32, val: u32, rel: Rel) -> Result<(), MacAbort> {
        if loc & 2 != 0 {
            self.write_h(loc & VAMASK, (val >> 16) & DMASK16, rel)?;
            self.write_h((loc + 2) & VAMASK, val & DMASK16, rel)?;
            return Ok(());
        }
        if self.mac_alias_write(loc, val, 4) {
            return Ok(());
        }
        let pa = if self.psw & PSW_REL != 0 && rel != Rel::P {
            self.reloc(loc, rel)?
        } else {
            loc
        };
        self.fab.mem.io_write_f(pa & !3, val);
        Ok(())
    }

    /* PSW handling */

    fn build_psw(&self, cc: u32) -> u32 {
        ((self.psw & !CC_MASK) | cc) & PSW_X32
    }

    fn int_eval(&mut self) {
        if self.fab.ints.eval() {
            self.qevent |= EV_INT;
        } else {
            self.qevent &= !EV_INT;
        }
    }

    /// Load a new PSW: re-aim the register set, track the wait state and
    /// the console interrupt enable
    pub fn new_psw(&mut self, val: u32) -> u32 {
        let new_rs = (((val >> PSW_V_REG) as usize) & 0xF) & self.psw_reg_mask() as usize;
        if new_rs != self.rs {
            self.greg[self.rs * 16..self.rs * 16 + 16].copy_from_slice(&self.r);
            self.r
                .copy_from_slice(&self.greg[new_rs * 16..new_rs * 16 + 16]);
            self.rs = new_rs;
        }
        self.psw = val & PSW_X32;
        self.int_eval();
        if self.psw & PSW_WAIT != 0 {
            self.qevent |= EV_WAIT;
        } else {
            self.qevent &= !EV_WAIT;
        }
        if self.psw & PSW_EXI != 0 {
            self.fab.ints.set_enb(V_DS);
        } else {
            self.fab.ints.clr_enb(V_DS);
        }
        self.psw & CC_MASK
    }

    /// Exception: load the new state from `loc`, old PSW and PC into R14
    /// and R15 of the new register set (set 0 on the 7/32)
    fn exception(&mut self, loc: u32, cc: u32, flg: u32) -> u32 {
        let old_psw = self.build_psw(cc);
        let old_pc = self.pc;
        let new_psw_val = self.read_f(loc, Rel::P).unwrap_or(0);
        let cc = self.new_psw(new_psw_val);
        self.pc = self.read_f(loc + 4, Rel::P).unwrap_or(0) & VAMASK;
        if self.model == Id32Model::M832 {
            self.r[14] = old_psw;
            self.r[15] = old_pc;
        } else if self.rs == 0 {
            self.r[14] = old_psw;
            self.r[15] = old_pc;
        } else {
            self.greg[14] = old_psw;
            self.greg[15] = old_pc;
        }
        debug!(loc, old_pc, pc = self.pc, psw = self.psw, "exception");
        cc | flg
    }

    fn test_sysq(&mut self, cc: u32) -> u32 {
        let qb = self.read_f(SQP, Rel::P).unwrap_or(0);
        let usd = self.read_h(qb + Q32_USD, Rel::P).unwrap_or(0);
        if usd != 0 {
            let cc = self.exception(SQTPSW, cc, 0);
            if self.model == Id32Model::M832 || self.rs == 0 {
                self.r[13] = qb;
            } else {
                self.greg[13] = qb;
            }
            return cc;
        }
        cc
    }

    /* Circular list primitives; the 32b header fields are halfwords */

    fn add_to_queue(&mut self, ea: u32, val: u32, bot: bool) -> MemResult {
        let t = self.read_f(ea, Rel::Vr)?;
        let slt = (t >> 16) & DMASK16;
        let usd = t & DMASK16;
        if usd >= slt {
            return Ok(CC_V);
        }
        self.write_h(ea + Q32_USD, (usd + 1) & DMASK16, Rel::Vw)?;
        let wra = if bot {
            let wra = self.read_h((ea + Q32_BOT) & VAMASK, Rel::Vr)?;
            let mut t = wra + 1;
            if t >= slt {
                t = 0;
            }
            self.write_h((ea + Q32_BOT) & VAMASK, t, Rel::Vw)?;
            wra
        } else {
            let mut wra = self.read_h((ea + Q32_TOP) & VAMASK, Rel::Vr)?;
            if wra == 0 {
                wra = (slt - 1) & DMASK16;
            } else {
                wra -= 1;
            }
            self.write_h((ea + Q32_TOP) & VAMASK, wra, Rel::Vw)?;
            wra
        };
        self.write_f((ea + Q32_BASE + wra * Q32_SLNT) & VAMASK, val, Rel::Vw)?;
        Ok(0)
    }

    fn rem_from_queue(&mut self, ea: u32, r1: usize, bot: bool) -> MemResult {
        let t = self.read_f(ea, Rel::Vr)?;
        let slt = (t >> 16) & DMASK16;
        let usd = t & DMASK16;
        if usd == 0 {
            return Ok(CC_V);
        }
        let usd = usd - 1;
        self.write_h(ea + Q32_USD, usd, Rel::Vw)?;
        let rda = if bot {
            let mut rda = self.read_h((ea + Q32_BOT) & VAMASK, Rel::Vr)?;
            if rda == 0 {
                rda = (slt - 1) & DMASK16;
            } else {
                rda -= 1;
            }
            self.write_h((ea + Q32_BOT) & VAMASK, rda, Rel::Vw)?;
            rda
        } else {
            let rda = self.read_h((ea + Q32_TOP) & VAMASK, Rel::Vr)?;
            let mut t = rda + 1;
            if t >= slt {
                t = 0;
            }
            self.write_h((ea + Q32_TOP) & VAMASK, t, Rel::Vw)?;
            rda
        };
        self.r[r1] = self.read_f((ea + Q32_BASE + rda * Q32_SLNT) & VAMASK, Rel::Vr)?;
        Ok(if usd != 0 { CC_G } else { 0 })
    }

    /* Automatic interrupt engine */

    /// Deliver an interrupt for `dev`: context-switch into the interrupt
    /// register state, then run the vector's channel program if any.
    /// Aborts inside the engine fall back to the restored caller state.
    pub fn int_auto(&mut self, dev: u32, cc: u32) -> u32 {
        match self.int_auto_inner(dev, cc) {
            Ok(cc) => cc,
            Err(MacAbort) => cc,
        }
    }

    fn int_auto_inner(&mut self, dev: u32, cc: u32) -> MemResult {
        let old_psw = self.build_psw(cc);
        let vec = self.read_h(INTSVT + 2 * dev, Rel::P)?;
        self.new_psw(0x2800);
        self.r[0] = old_psw;
        self.r[1] = self.pc;
        self.r[2] = dev;
        trace!(dev, vec, "auto interrupt");
        let hw;
        if self.fab.dev_acc(dev) {
            hw = self.fab.dev_io(dev, IoOp::Adr, 0) != 0;
            self.r[3] = self.fab.dev_io(dev, IoOp::Ss, 0);
        } else {
            hw = false;
            self.r[3] = CC_V;
        }
        let st = self.r[3];
        if vec & 1 == 0 {
            self.pc = vec;
            return Ok(self.psw & CC_MASK);
        }
        let ccwa = vec & !1;
        self.r[4] = ccwa;
        let ccw = self.read_h(ccwa, Rel::Vr)?;
        if ccw & CCW32_EXE == 0 {
            self.pc = self.read_h(ccwa + CCB32_SUB, Rel::Vr)?;
            return Ok(0);
        }
        if !self.fab.dev_acc(dev) || st & ccw32_sta(ccw) != 0 {
            self.pc = self.read_h(ccwa + CCB32_SUB, Rel::Vr)?;
            return Ok(CC_L);
        }
        if ccw & CCW32_FST != 0 {
            // fast mode: single buffer, halfword capable, no translation
            let t = self.read_h(ccwa + CCB32_B0C, Rel::Vr)?;
            let mut bufc = sext16(t);
            if bufc <= 0 {
                let bufe = self.read_f(ccwa + CCB32_B0E, Rel::Vr)?;
                let addr = bufe.wrapping_add(bufc as u32) & VAMASK;
                if hw {
                    if ccw & CCW32_WR != 0 {
                        let t = self.read_h(addr, Rel::Vr)?;
                        self.fab.dev_io(dev, IoOp::Wh, t);
                    } else {
                        let t = self.fab.dev_io(dev, IoOp::Rh, 0);
                        self.write_h(addr, t, Rel::Vw)?;
                    }
                    bufc += 2;
                } else {
                    if ccw & CCW32_WR != 0 {
                        let t = self.read_b(addr, Rel::Vr)?;
                        self.fab.dev_io(dev, IoOp::Wd, t);
                    } else {
                        let t = self.fab.dev_io(dev, IoOp::Rd, 0);
                        self.write_b(addr, t, Rel::Vw)?;
                    }
                    bufc += 1;
                }
                self.write_h(ccwa + CCB32_B0C, bufc as u32 & DMASK16, Rel::Vw)?;
                if bufc > 0 {
                    self.pc = self.read_h(ccwa + CCB32_SUB, Rel::Vr)?;
                    return Ok(CC_G);
                }
            }
        } else {
            // slow mode: dual buffers, optional translation and CRC
            let ccwb = if ccw & CCW32_B1 != 0 {
                ccwa + CCB32_B1C
            } else {
                ccwa + CCB32_B0C
            };
            let t = self.read_h(ccwb, Rel::Vr)?;
            let mut bufc = sext16(t);
            if bufc <= 0 {
                let bufe = self.read_f(ccwb + 2, Rel::Vr)?;
                let addr = bufe.wrapping_add(bufc as u32) & VAMASK;
                let by;
                if ccw & CCW32_WR != 0 {
                    let mut b = self.read_b(addr, Rel::Vr)?;
                    if ccw & CCW32_TL != 0 {
                        let tblad = self.read_f(ccwa + CCB32_TAB, Rel::Vr)?;
                        let tblen = (tblad + (b << 1)) & VAMASK;
                        let t = self.read_h(tblen, Rel::Vr)?;
                        if t & SIGN16 == 0 {
                            // untranslatable: branch with the raw byte
                            self.pc = t << 1;
                            self.r[3] = b;
                            return Ok(0);
                        }
                        b = t & DMASK8;
                    }
                    self.fab.dev_io(dev, IoOp::Wd, b);
                    by = b;
                } else {
                    let b = self.fab.dev_io(dev, IoOp::Rd, 0);
                    if ccw & CCW32_TL != 0 {
                        let tblad = self.read_f(ccwa + CCB32_TAB, Rel::Vr)?;
                        let tblen = (tblad + (b << 1)) & VAMASK;
                        let t = self.read_h(tblen, Rel::Vr)?;
                        if t & SIGN16 == 0 {
                            self.pc = t << 1;
                            self.r[3] = b;
                            return Ok(0);
                        }
                        self.write_b(addr, t, Rel::Vw)?;
                    } else {
                        self.write_b(addr, b, Rel::Vw)?;
                    }
                    by = b;
                }
                // LRC/CRC accumulation over the transferred byte
                let mut chk = self.read_h(ccwa + CCB32_CHK, Rel::Vr)? ^ by;
                if ccw & CCW32_CRC != 0 {
                    for _ in 0..8 {
                        chk = if chk & 1 != 0 {
                            (chk >> 1) ^ 0xA001
                        } else {
                            chk >> 1
                        };
                    }
                }
                self.write_h(ccwa + CCB32_CHK, chk, Rel::Vw)?;
                bufc += 1;
                self.write_h(ccwb, bufc as u32 & DMASK16, Rel::Vw)?;
                if bufc > 0 {
                    // buffer full: flip to the alternate and notify
                    let ccw = ccw ^ CCW32_B1;
                    self.write_h(ccwa, ccw, Rel::Vw)?;
                    self.pc = self.read_h(ccwa + CCB32_SUB, Rel::Vr)?;
                    return Ok(CC_G);
                }
            }
        }
        // nothing to do: restore the interrupted context
        self.pc = self.r[1];
        Ok(self.new_psw(self.r[0]))
    }

    /* Bootstraps: deposit the autoload stub, point the autoload cells at
       the device, and start at the stub */

    const BOOT_START: u32 = 0x50;
    const BOOT_ROM: [u8; 8] = [
        0xD5, 0x00, 0x00, 0xCF, /* AL CF */
        0x43, 0x00, 0x00, 0x80, /* BR 80 */
    ];

    fn boot_common(&mut self, dev: u32, ioc: u32, sch_dev: u32) {
        for (i, &b) in Self::BOOT_ROM.iter().enumerate() {
            self.fab.mem.io_write_b(Self::BOOT_START + i as u32, b as u32);
        }
        self.fab.mem.io_write_b(AL_DEV, dev);
        self.fab.mem.io_write_b(AL_IOC, ioc);
        self.fab.mem.io_write_b(AL_SCH, sch_dev);
        self.pc = Self::BOOT_START;
    }

    /// Boot from the paper tape reader
    pub fn boot_paper_tape(&mut self) {
        let dev = self.fab.devs.pt.dno;
        self.boot_common(dev, 0x99, 0);
    }

    /// Boot from a magtape drive
    pub fn boot_magtape(&mut self, unit: usize) {
        self.fab.devs.mt.image_mut(unit).rewind();
        let dev = self.fab.devs.mt.dno + unit as u32 * O_MT0;
        let sch_dev = D_SCH + self.fab.devs.mt.sch as u32;
        self.boot_common(dev, 0xA1, sch_dev);
    }

    /// Boot from a floppy drive
    pub fn boot_floppy(&mut self, unit: usize) {
        let dev = self.fab.devs.fd.dno;
        self.boot_common(dev, 0x86 + ((unit as u32) << 4), 0);
    }

    /// Run the interpreter for up to `limit` instructions
    pub fn run(&mut self, limit: u64) -> StopReason {
        if !self.devtab_ok {
            if self.fab.init_devtab().is_err() {
                return StopReason::DeviceConflict;
            }
            self.devtab_ok = true;
        }
        self.dec_flgs = if self.dp_fp { 0 } else { OP_DPF };
        self.int_eval();
        let mut cc = self.new_psw(self.psw);
        let end = self.fab.sched.gtime() + limit;
        let reason = loop {
            if self.fab.sched.gtime() >= end {
                break StopReason::Complete;
            }

            if self.fab.sched.event_pending() {
                if let Err(r) = self.fab.process_events() {
                    break r;
                }
                self.int_eval();
            }

            if self.qevent != 0 {
                if self.qevent & EV_MAC != 0 {
                    self.qevent = 0;
                    cc = self.exception(MPRPSW, cc, 0);
                    self.int_eval();
                    continue;
                }
                if self.qevent & EV_BLK != 0 {
                    if let Some(r) = self.blk_io_cycle() {
                        break r;
                    }
                    continue;
                }
                if self.qevent & EV_INT != 0 && self.psw & PSW_EXI != 0 {
                    let dev = self.fab.ints.getdev();
                    cc = self.int_auto(dev, cc);
                    self.int_eval();
                    continue;
                }
                if self.psw & PSW_WAIT != 0 {
                    if !self.fab.sched.warp_to_next() {
                        break StopReason::Wait;
                    }
                    continue;
                }
                self.qevent = 0;
            }

            if self.breakpoints.contains(&self.pc) {
                break StopReason::Breakpoint;
            }

            self.fab.sched.tick();
            match self.exec_one(cc) {
                Ok(Ok(new_cc)) => cc = new_cc,
                Ok(Err(r)) => break r,
                Err(MacAbort) => {
                    // instruction aborted; on the 8/32 it can be retried
                    if self.model == Id32Model::M832 {
                        self.pc = self.o_pc;
                    }
                }
            }
        };
        self.psw = self.build_psw(cc);
        self.pc &= VAMASK;
        reason
    }

    fn blk_io_cycle(&mut self) -> Option<StopReason> {
        let dev = self.blk.dfl & DEV_MAX;
        let sta = self.fab.dev_io(dev, IoOp::Ss, 0) & 0xF;
        if sta == STA_BSY {
            if !self.fab.sched.warp_to_next() {
                return Some(StopReason::Wait);
            }
            return None;
        }
        if sta == 0 {
            if self.blk.dfl & BL_RD != 0 {
                let t = self.fab.dev_io(dev, IoOp::Rd, 0);
                if t == 0 && self.blk.dfl & BL_LZ != 0 {
                    return None;
                }
                self.blk.dfl &= !BL_LZ;
                let _ = self.write_b(self.blk.cur, t, Rel::Vw);
            } else {
                let t = self.read_b(self.blk.cur, Rel::Vr).unwrap_or(0);
                self.fab.dev_io(dev, IoOp::Wd, t);
            }
            if self.blk.cur != self.blk.end {
                self.blk.cur = (self.blk.cur + 1) & VAMASK;
                return None;
            }
        }
        self.qevent &= !EV_BLK;
        self.int_eval();
        None
    }

    fn pcq_entry(&mut self) {
        self.pcq_p = self.pcq_p.wrapping_sub(1) & PCQ_MASK;
        self.pcq[self.pcq_p] = self.o_pc;
    }

    fn fp_op2(&mut self, op: u32, r2: u32, ea: u32, dp: bool) -> Result<Ufp, MacAbort> {
        if op_type(&DECROM, op) > OP_RR {
            let hi = self.read_f(ea, Rel::Vr)?;
            let lo = if dp { self.read_f(ea + 4, Rel::Vr)? } else { 0 };
            Ok(Ufp::unpack(hi, lo))
        } else if dp {
            let (h, l) = self.dregs[(r2 >> 1) as usize];
            Ok(Ufp::unpack(h, l))
        } else {
            Ok(Ufp::unpack(self.fregs[(r2 >> 1) as usize], 0))
        }
    }

    fn fp_op1(&self, r1: usize, dp: bool) -> Ufp {
        if dp {
            let (h, l) = self.dregs[r1 >> 1];
            Ufp::unpack(h, l)
        } else {
            Ufp::unpack(self.fregs[r1 >> 1], 0)
        }
    }

    fn fp_store(&mut self, packed: fp::Packed, r1: usize, dp: bool) -> u32 {
        let (hi, lo, cc) = packed;
        if dp {
            self.dregs[r1 >> 1] = (hi, lo);
        } else {
            self.fregs[r1 >> 1] = hi;
        }
        cc
    }

    fn arith_fault(&mut self, cc: u32, flg: u32) -> u32 {
        if cc & CC_V != 0 && self.psw & PSW_AFI != 0 {
            return self.exception(AFIPSW, cc, flg);
        }
        cc
    }

    /// Fetch, decode, and execute one instruction. The outer `Result` is
    /// a MAC abort; the inner one a simulator stop.
    fn exec_one(&mut self, mut cc: u32) -> Result<Result<u32, StopReason>, MacAbort> {
        self.o_pc = self.pc;
        let ir1 = self.read_h(self.pc, Rel::Ve)?;
        let op = (ir1 >> 8) & 0xFF;
        let r1 = ((ir1 >> 4) & 0xF) as usize;
        let r2 = (ir1 & 0xF) as usize;
        let drom = DECROM[op as usize];
        let ityp = drom & OP_MASK;

        if drom == 0 || drom & self.dec_flgs != 0 {
            if self.stop_inst {
                return Ok(Err(StopReason::IllegalInstruction));
            }
            return Ok(Ok(self.exception(ILOPSW, cc, 0)));
        }
        if drom & OP_PRV != 0 && self.psw & PSW_PRO != 0 {
            return Ok(Ok(self.exception(ILOPSW, cc, 0)));
        }

        let mut ea = 0;
        let mut ir2 = 0;
        let mut ir3 = 0;
        let opnd = match ityp {
            OP_NO => {
                self.pc = (self.pc + 2) & VAMASK;
                r2 as u32
            }
            OP_RR => {
                self.pc = (self.pc + 2) & VAMASK;
                self.r[r2]
            }
            OP_RI1 => {
                ir2 = self.read_h((self.pc + 2) & VAMASK, Rel::Ve)?;
                let mut opnd = sext16(ir2) as u32;
                if r2 != 0 {
                    opnd = opnd.wrapping_add(self.r[r2]);
                }
                self.pc = (self.pc + 4) & VAMASK;
                opnd
            }
            OP_RI2 => {
                ir2 = self.read_h((self.pc + 2) & VAMASK, Rel::Ve)?;
                ir3 = self.read_h((self.pc + 4) & VAMASK, Rel::Ve)?;
                let mut opnd = (ir2 << 16) | ir3;
                if r2 != 0 {
                    opnd = opnd.wrapping_add(self.r[r2]);
                }
                self.pc = (self.pc + 6) & VAMASK;
                opnd
            }
            OP_RX | OP_RXB | OP_RXH | OP_RXF => {
                ir2 = self.read_h((self.pc + 2) & VAMASK, Rel::Ve)?;
                if ir2 & 0xC000 == 0 {
                    // 14-bit absolute displacement
                    self.pc = (self.pc + 4) & VAMASK;
                    ea = ir2;
                } else if ir2 & 0x8000 != 0 {
                    // 15-bit PC relative
                    self.pc = (self.pc + 4) & VAMASK;
                    ea = self.pc.wrapping_add(sext15(ir2) as u32);
                } else {
                    // long form: second index, 24-bit address
                    let rx2 = ((ir2 >> 8) & 0xF) as usize;
                    ea = (ir2 & 0xFF) << 16;
                    ir3 = self.read_h((self.pc + 4) & VAMASK, Rel::Ve)?;
                    ea |= ir3;
                    if rx2 != 0 {
                        ea = ea.wrapping_add(self.r[rx2]);
                    }
                    self.pc = (self.pc + 6) & VAMASK;
                }
                if r2 != 0 {
                    ea = ea.wrapping_add(self.r[r2]);
                }
                ea &= VAMASK;
                match ityp {
                    OP_RXF => self.read_f(ea, Rel::Vr)?,
                    OP_RXH => sext16(self.read_h(ea, Rel::Vr)?) as u32,
                    OP_RXB => self.read_b(ea, Rel::Vr)?,
                    _ => ea,
                }
            }
            _ => unreachable!(),
        };

        if !self.hist.is_empty() {
            let p = self.hist_p;
            self.hist[p] = Hist32 {
                valid: true,
                pc: self.o_pc,
                ir1,
                ir2,
                ir3,
                r1: self.r[r1],
                ea,
                opnd,
            };
            self.hist_p = (self.hist_p + 1) % self.hist.len();
        }
        if self.qevent & EV_MAC != 0 {
            // execute-protect or write-interrupt seen during fetch
            return Ok(Ok(cc));
        }

        let r1p1 = (r1 + 1) & 0xF;
        let dp = drom & OP_DPF != 0;

        match op {
            /* Load/store */
            0x08 | 0x24 | 0x48 | 0x58 | 0xC8 | 0xF8 => {
                // LR, LIS, LH, L, LHI, LI
                self.r[r1] = opnd;
                cc = cc_gl_32(self.r[r1]);
            }
            0x73 => {
                // LHL
                self.r[r1] = opnd & DMASK16;
                cc = cc_gl_32(self.r[r1]);
            }
            0x25 => {
                // LCS
                self.r[r1] = neg32(opnd);
                cc = cc_gl_32(self.r[r1]);
            }
            0xE6 => self.r[r1] = ea, // LA
            0x63 => {
                // LRA: translation test
                let (new_cc, pa) = self.reloc_test(self.r[r1] & VAMASK, ea, Rel::Vr);
                if let Some(pa) = pa {
                    self.r[r1] = pa;
                }
                cc = new_cc;
            }
            0x40 => self.write_h(ea, self.r[r1], Rel::Vw)?, // STH
            0x50 => self.write_f(ea, self.r[r1], Rel::Vw)?, // ST
            0xD1 => {
                // LM
                let mut ea = ea;
                for i in r1..16 {
                    self.r[i] = self.read_f(ea, Rel::Vr)?;
                    ea = (ea + 4) & VAMASK;
                }
            }
            0xD0 => {
                // STM
                let mut ea = ea;
                for i in r1..16 {
                    self.write_f(ea, self.r[i], Rel::Vw)?;
                    ea = (ea + 4) & VAMASK;
                }
            }
            0xE0 => {
                // TS
                cc = cc_gl_16(opnd & DMASK16);
                self.write_h(ea, (opnd | SIGN16) & DMASK16, Rel::Vw)?;
            }
            0x93 | 0xD3 => self.r[r1] = opnd & DMASK8, // LDBR, LDB
            0x92 => self.r[r2] = (self.r[r2] & !DMASK8) | (self.r[r1] & DMASK8), // STBR
            0xD2 => self.write_b(ea, self.r[r1], Rel::Vw)?, // STB
            0x34 => {
                // EXHR
                self.r[r1] = ((opnd >> 16) & DMASK16) | ((opnd & DMASK16) << 16);
            }
            0x94 => {
                // EXBR
                self.r[r1] =
                    (self.r[r1] & !DMASK16) | ((opnd >> 8) & DMASK8) | ((opnd & DMASK8) << 8);
            }

            /* Control */
            0x01 | 0x41 => {
                // BALR, BAL
                self.pcq_entry();
                self.r[r1] = self.pc;
                self.pc = opnd & VAMASK;
            }
            0x02 | 0x42 => {
                if cc & r1 as u32 != 0 {
                    self.pcq_entry();
                    self.pc = opnd & VAMASK;
                }
            }
            0x20 => {
                if cc & r1 as u32 != 0 {
                    self.pcq_entry();
                    self.pc = self.o_pc.wrapping_sub(2 * r2 as u32) & VAMASK;
                }
            }
            0x21 => {
                if cc & r1 as u32 != 0 {
                    self.pcq_entry();
                    self.pc = (self.o_pc + 2 * r2 as u32) & VAMASK;
                }
            }
            0x03 | 0x43 => {
                if cc & r1 as u32 == 0 {
                    self.pcq_entry();
                    self.pc = opnd & VAMASK;
                }
            }
            0x22 => {
                if cc & r1 as u32 == 0 {
                    self.pcq_entry();
                    self.pc = self.o_pc.wrapping_sub(2 * r2 as u32) & VAMASK;
                }
            }
            0x23 => {
                if cc & r1 as u32 == 0 {
                    self.pcq_entry();
                    self.pc = (self.o_pc + 2 * r2 as u32) & VAMASK;
                }
            }
            0xC0 => {
                // BXH
                let inc = self.r[r1p1];
                let lim = self.r[(r1 + 2) & 0xF];
                self.r[r1] = self.r[r1].wrapping_add(inc);
                if self.r[r1] > lim {
                    self.pcq_entry();
                    self.pc = opnd & VAMASK;
                }
            }
            0xC1 => {
                // BXLE
                let inc = self.r[r1p1];
                let lim = self.r[(r1 + 2) & 0xF];
                self.r[r1] = self.r[r1].wrapping_add(inc);
                if self.r[r1] <= lim {
                    self.pcq_entry();
                    self.pc = opnd & VAMASK;
                }
            }

            /* Logical */
            0x04 | 0x44 | 0x54 | 0xC4 | 0xF4 => {
                // NR, NH, N, NHI, NI
                self.r[r1] &= opnd;
                cc = cc_gl_32(self.r[r1]);
            }
            0x06 | 0x46 | 0x56 | 0xC6 | 0xF6 => {
                // OR, OH, O, OHI, OI
                self.r[r1] |= opnd;
                cc = cc_gl_32(self.r[r1]);
            }
            0x07 | 0x47 | 0x57 | 0xC7 | 0xF7 => {
                // XR, XH, X, XHI, XI
                self.r[r1] ^= opnd;
                cc = cc_gl_32(self.r[r1]);
            }
            0xC3 | 0xF3 => cc = cc_gl_32(self.r[r1] & opnd), // THI, TI
            0x05 | 0x45 | 0x55 | 0xC5 | 0xF5 => {
                // CLR, CLH, CL, CLHI, CLI
                let rslt = self.r[r1].wrapping_sub(opnd);
                cc = cc_gl_32(rslt);
                if self.r[r1] < opnd {
                    cc |= CC_C;
                }
                if ((self.r[r1] ^ opnd) & (!opnd ^ rslt)) & SIGN32 != 0 {
                    cc |= CC_V;
                }
            }
            0xD4 => {
                // CLB
                let t = self.r[r1] & DMASK8;
                let rslt = t.wrapping_sub(opnd) & DMASK16;
                cc = cc_gl_16(rslt);
                if t < opnd {
                    cc |= CC_C;
                }
            }
            0x12 => {
                // CHVR
                let t = cc & CC_C;
                self.r[r1] = sext16(opnd & DMASK16) as u32;
                cc = cc_gl_32(self.r[r1]);
                if self.r[r1] != opnd {
                    cc |= CC_V;
                }
                cc |= t;
            }

            /* Shifts */
            0xCC | 0x90 => {
                // SRHL, SRHLS
                let sc = if op == 0xCC { opnd & 0xF } else { opnd };
                let rslt = (self.r[r1] & DMASK16) >> sc;
                cc = cc_gl_16(rslt);
                if sc != 0 && ((self.r[r1] & DMASK16) >> (sc - 1)) & 1 != 0 {
                    cc |= CC_C;
                }
                self.r[r1] = (self.r[r1] & !DMASK16) | rslt;
            }
            0xCD | 0x91 => {
                // SLHL, SLHLS
                let sc = if op == 0xCD { opnd & 0xF } else { opnd };
                let rslt = self.r[r1] << sc;
                cc = cc_gl_16(rslt & DMASK16);
                if sc != 0 && rslt & 0x10000 != 0 {
                    cc |= CC_C;
                }
                self.r[r1] = (self.r[r1] & !DMASK16) | (rslt & DMASK16);
            }
            0xCE => {
                // SRHA
                let sc = opnd & 0xF;
                let rslt = (sext16(self.r[r1]) >> sc) as u32 & DMASK16;
                cc = cc_gl_16(rslt);
                if sc != 0 && (self.r[r1] >> (sc - 1)) & 1 != 0 {
                    cc |= CC_C;
                }
                self.r[r1] = (self.r[r1] & !DMASK16) | rslt;
            }
            0xCF => {
                // SLHA
                let sc = opnd & 0xF;
                let rslt = self.r[r1] << sc;
                self.r[r1] = (self.r[r1] & !MMASK16) | (rslt & MMASK16);
                cc = cc_gl_16(self.r[r1] & DMASK16);
                if sc != 0 && rslt & SIGN16 != 0 {
                    cc |= CC_C;
                }
            }
            0xEC | 0x10 => {
                // SRL, SRLS
                let sc = if op == 0xEC { opnd & 0x1F } else { opnd };
                let rslt = self.r[r1].checked_shr(sc).unwrap_or(0);
                cc = cc_gl_32(rslt);
                if sc != 0 && (self.r[r1] >> (sc - 1)) & 1 != 0 {
                    cc |= CC_C;
                }
                self.r[r1] = rslt;
            }
            0xED | 0x11 => {
                // SLL, SLLS
                let sc = if op == 0xED { opnd & 0x1F } else { opnd };
                let rslt = self.r[r1].checked_shl(sc).unwrap_or(0);
                cc = cc_gl_32(rslt);
                if sc != 0 && (self.r[r1] << (sc - 1)) & SIGN32 != 0 {
                    cc |= CC_C;
                }
                self.r[r1] = rslt;
            }
            0xEE => {
                // SRA
                let sc = opnd & 0x1F;
                let rslt = ((self.r[r1] as i32) >> sc) as u32;
                cc = cc_gl_32(rslt);
                if sc != 0 && (self.r[r1] >> (sc - 1)) & 1 != 0 {
                    cc |= CC_C;
                }
                self.r[r1] = rslt;
            }
            0xEF => {
                // SLA
                let sc = opnd & 0x1F;
                let rslt = self.r[r1].checked_shl(sc).unwrap_or(0);
                self.r[r1] = (self.r[r1] & SIGN32) | (rslt & MMASK32);
                cc = cc_gl_32(self.r[r1]);
                if sc != 0 && rslt & SIGN32 != 0 {
                    cc |= CC_C;
                }
            }
            0xEA => {
                // RRL
                let sc = opnd & 0x1F;
                if sc != 0 {
                    self.r[r1] = self.r[r1].rotate_right(sc);
                }
                cc = cc_gl_32(self.r[r1]);
            }
            0xEB => {
                // RLL
                let sc = opnd & 0x1F;
                if sc != 0 {
                    self.r[r1] = self.r[r1].rotate_left(sc);
                }
                cc = cc_gl_32(self.r[r1]);
            }

            /* Bit operations: R1 indexes a bit in the halfword at EA */
            0x74..=0x77 => {
                // TBT, SBT, RBT, CBT
                let t = 1u32 << (15 - (self.r[r1] & 0xF));
                let ea = (ea + ((self.r[r1] >> 3) & !1)) & VAMASK;
                let old = self.read_h(ea, Rel::Vr)?;
                match op {
                    0x75 => self.write_h(ea, old | t, Rel::Vw)?,
                    0x76 => self.write_h(ea, old & !t, Rel::Vw)?,
                    0x77 => self.write_h(ea, old ^ t, Rel::Vw)?,
                    _ => {}
                }
                cc = if old & t != 0 { CC_G } else { 0 };
            }

            /* Arithmetic */
            0x0A | 0x26 | 0x4A | 0x5A | 0xCA | 0xFA => {
                // AR, AIS, AH, A, AHI, AI
                let rslt = self.r[r1].wrapping_add(opnd);
                cc = cc_gl_32(rslt);
                if rslt < opnd {
                    cc |= CC_C;
                }
                if ((!self.r[r1] ^ opnd) & (self.r[r1] ^ rslt)) & SIGN32 != 0 {
                    cc |= CC_V;
                }
                self.r[r1] = rslt;
            }
            0x51 => {
                // AM
                let rslt = self.r[r1].wrapping_add(opnd);
                self.write_f(ea, rslt, Rel::Vw)?;
                cc = cc_gl_32(rslt);
                if rslt < opnd {
                    cc |= CC_C;
                }
                if ((!self.r[r1] ^ opnd) & (self.r[r1] ^ rslt)) & SIGN32 != 0 {
                    cc |= CC_V;
                }
            }
            0x61 => {
                // AHM
                let rslt = self.r[r1].wrapping_add(opnd) & DMASK16;
                self.write_h(ea, rslt, Rel::Vw)?;
                cc = cc_gl_16(rslt);
                if rslt < (opnd & DMASK16) {
                    cc |= CC_C;
                }
                if ((!self.r[r1] ^ opnd) & (self.r[r1] ^ rslt)) & SIGN16 != 0 {
                    cc |= CC_V;
                }
            }
            0x0B | 0x27 | 0x4B | 0x5B | 0xCB | 0xFB => {
                // SR, SIS, SH, S, SHI, SI
                let rslt = self.r[r1].wrapping_sub(opnd);
                cc = cc_gl_32(rslt);
                if self.r[r1] < opnd {
                    cc |= CC_C;
                }
                if ((self.r[r1] ^ opnd) & (!opnd ^ rslt)) & SIGN32 != 0 {
                    cc |= CC_V;
                }
                self.r[r1] = rslt;
            }
            0x09 | 0x49 | 0x59 | 0xC9 | 0xF9 => {
                // CR, CH, C, CHI, CI
                cc = if self.r[r1] == opnd {
                    0
                } else if (self.r[r1] ^ opnd) & SIGN32 != 0 {
                    if self.r[r1] & SIGN32 != 0 {
                        CC_C | CC_L
                    } else {
                        CC_G
                    }
                } else if self.r[r1] > opnd {
                    CC_G
                } else {
                    CC_C | CC_L
                };
                if ((self.r[r1] ^ opnd) & (!opnd ^ self.r[r1].wrapping_sub(opnd))) & SIGN32 != 0 {
                    cc |= CC_V;
                }
            }
            0x0C | 0x4C => {
                // MHR, MH
                self.r[r1] = (sext16(self.r[r1]).wrapping_mul(sext16(opnd))) as u32;
            }
            0x1C | 0x5C => {
                // MR, M: 64-bit product into the register pair
                let prod =
                    (self.r[r1p1] as i32 as i64).wrapping_mul(opnd as i32 as i64) as u64;
                self.r[r1] = (prod >> 32) as u32;
                self.r[r1p1] = prod as u32;
            }
            0x0D | 0x4D => {
                // DHR, DH
                let opnd = opnd & DMASK16;
                if opnd == 0 || (self.r[r1] == 0x8000_0000 && opnd == 0xFFFF) {
                    if self.psw & PSW_AFI != 0 {
                        cc = self.exception(AFIPSW, cc, 0);
                    }
                } else {
                    let quo = (self.r[r1] as i32) / sext16(opnd);
                    let rem = (self.r[r1] as i32) % sext16(opnd);
                    if quo < 0x8000 && quo >= -0x8000 {
                        self.r[r1] = rem as u32;
                        self.r[r1p1] = quo as u32;
                    } else if self.psw & PSW_AFI != 0 {
                        cc = self.exception(AFIPSW, cc, 0);
                    }
                }
            }
            0x1D | 0x5D => {
                // DR, D: 64 / 32 divide
                let divd = (((self.r[r1] as u64) << 32) | self.r[r1p1] as u64) as i64;
                if opnd == 0 {
                    if self.psw & PSW_AFI != 0 {
                        cc = self.exception(AFIPSW, cc, 0);
                    }
                } else {
                    let dvr = opnd as i32 as i64;
                    let quo = divd.wrapping_div(dvr);
                    let rem = divd.wrapping_rem(dvr);
                    if quo >= -(1i64 << 31) && quo < (1i64 << 31) {
                        self.r[r1] = rem as u32;
                        self.r[r1p1] = quo as u32;
                    } else if self.psw & PSW_AFI != 0 {
                        cc = self.exception(AFIPSW, cc, 0);
                    }
                }
            }

            /* Floating point */
            0x28 | 0x38 | 0x68 | 0x78 => {
                // LER, LDR, LE, LD
                let fop2 = self.fp_op2(op, r2 as u32, ea, dp)?;
                cc = self.fp_store(fp::f_load(fop2), r1, dp);
                cc = self.arith_fault(cc, 1);
            }
            0x29 | 0x39 | 0x69 | 0x79 => {
                // CER, CDR, CE, CD
                let fop2 = self.fp_op2(op, r2 as u32, ea, dp)?;
                let fop1 = self.fp_op1(r1, dp);
                cc = fp::f_cmp(fop1, fop2, dp);
            }
            0x2A | 0x2B | 0x3A | 0x3B | 0x6A | 0x6B | 0x7A | 0x7B => {
                // AER, SER, ADR, SDR, AE, SE, AD, SD
                let fop2 = self.fp_op2(op, r2 as u32, ea, dp)?;
                let fop1 = self.fp_op1(r1, dp);
                cc = self.fp_store(fp::f_addsub(fop1, fop2, op & 1 != 0, true, !dp), r1, dp);
                cc = self.arith_fault(cc, 1);
            }
            0x2C | 0x3C | 0x6C | 0x7C => {
                // MER, MDR, ME, MD
                let fop2 = self.fp_op2(op, r2 as u32, ea, dp)?;
                let fop1 = self.fp_op1(r1, dp);
                cc = self.fp_store(fp::f_mul(fop1, fop2, dp), r1, dp);
                cc = self.arith_fault(cc, 1);
            }
            0x2D | 0x3D | 0x6D | 0x7D => {
                // DER, DDR, DE, DD
                let fop2 = self.fp_op2(op, r2 as u32, ea, dp)?;
                let fop1 = self.fp_op1(r1, dp);
                cc = match fp::f_div(fop1, fop2, dp) {
                    Some(p) => self.fp_store(p, r1, dp),
                    None => CC_C | CC_V,
                };
                cc = self.arith_fault(cc, 1);
            }
            0x2E | 0x3E => {
                // FXR, FXDR
                let res = self.fp_op1(r2, dp);
                let (val, new_cc) = fp::f_fix32(res);
                self.r[r1] = val;
                cc = new_cc;
            }
            0x2F | 0x3F => {
                // FLR, FLDR
                let (packed, new_cc) = fp::f_flt32(self.r[r2]);
                self.fp_store(packed, r1, dp);
                cc = new_cc;
            }
            0x60 => {
                // STE
                let t = self.fregs[r1 >> 1];
                self.write_f(ea, t, Rel::Vw)?;
            }
            0x70 => {
                // STD
                let (h, l) = self.dregs[r1 >> 1];
                self.write_f(ea, h, Rel::Vw)?;
                self.write_f((ea + 4) & VAMASK, l, Rel::Vw)?;
            }
            0x71 => {
                // STME
                let mut ea = ea;
                let mut r = r1;
                while r <= 0xE {
                    self.write_f(ea, self.fregs[r >> 1], Rel::Vw)?;
                    ea = (ea + 4) & VAMASK;
                    r += 2;
                }
            }
            0x72 => {
                // LME
                let mut ea = ea;
                let mut r = r1;
                while r <= 0xE {
                    self.fregs[r >> 1] = self.read_f(ea, Rel::Vr)?;
                    ea = (ea + 4) & VAMASK;
                    r += 2;
                }
            }
            0x7E => {
                // STMD
                let mut ea = ea;
                let mut r = r1;
                while r <= 0xE {
                    let (h, l) = self.dregs[r >> 1];
                    self.write_f(ea, h, Rel::Vw)?;
                    self.write_f((ea + 4) & VAMASK, l, Rel::Vw)?;
                    ea = (ea + 8) & VAMASK;
                    r += 2;
                }
            }
            0x7F => {
                // LMD
                let mut ea = ea;
                let mut r = r1;
                while r <= 0xE {
                    let h = self.read_f(ea, Rel::Vr)?;
                    let l = self.read_f((ea + 4) & VAMASK, Rel::Vr)?;
                    self.dregs[r >> 1] = (h, l);
                    ea = (ea + 8) & VAMASK;
                    r += 2;
                }
            }

            /* Miscellaneous */
            0xE1 => {
                // SVC: parameter in R13, old state in R14/R15 of the new
                // register set
                self.pcq_entry();
                let t = self.build_psw(cc);
                let new_psw_val = self.read_f(SVNPS32, Rel::P)?;
                cc = self.new_psw(new_psw_val);
                self.r[13] = ea & 0xFF_FFFF;
                self.r[14] = t;
                self.r[15] = self.pc;
                self.pc = self.read_h(SVNPC + 2 * r1 as u32, Rel::P)?;
                debug!(old_psw = t, pc = self.pc, "svc");
            }
            0xE2 => {
                // SINT
                let dev = opnd & DEV_MAX;
                cc = self.int_auto(dev, cc);
                self.int_eval();
            }
            0xE3 => {
                // SCP: service the channel program's buffer directly
                let opnd = opnd & DMASK16;
                let t = if opnd & CCW32_B1 != 0 {
                    ea + CCB32_B1C
                } else {
                    ea + CCB32_B0C
                };
                let cnt = sext16(self.read_h(t & VAMASK, Rel::Vr)?);
                if cnt <= 0 {
                    let bufa = self.read_f((t + 2) & VAMASK, Rel::Vr)?;
                    let addr = bufa.wrapping_add(cnt as u32) & VAMASK;
                    if opnd & CCW32_WR != 0 {
                        self.r[r1] = self.read_b(addr, Rel::Vr)?;
                    } else {
                        self.write_b(addr, self.r[r1], Rel::Vw)?;
                    }
                    let cnt = cnt + 1;
                    cc = cc_gl_32(cnt as u32);
                    self.write_h(t & VAMASK, cnt as u32 & DMASK16, Rel::Vw)?;
                    if cnt > 0 && opnd & CCW32_FST == 0 {
                        self.write_h(ea, opnd ^ CCW32_B1, Rel::Vw)?;
                    }
                } else {
                    cc = CC_V;
                }
            }
            0x18 => {
                // LPSWR: PC from the old register set's R2+1
                self.pcq_entry();
                self.pc = self.r[(r2 + 1) & 0xF] & VAMASK;
                debug!(pc = self.pc, psw = opnd, "lpswr");
                cc = self.new_psw(opnd);
                if self.psw & PSW_SQI != 0 {
                    cc = self.test_sysq(cc);
                }
            }
            0xC2 => {
                // LPSW
                self.pcq_entry();
                self.pc = self.read_f((ea + 4) & VAMASK, Rel::Vr)? & VAMASK;
                debug!(pc = self.pc, psw = opnd, "lpsw");
                cc = self.new_psw(opnd);
                if self.psw & PSW_SQI != 0 {
                    cc = self.test_sysq(cc);
                }
            }
            0x95 => {
                // EPSR
                self.r[r1] = self.build_psw(cc);
                cc = self.new_psw(self.r[r2]);
                if self.psw & PSW_SQI != 0 {
                    cc = self.test_sysq(cc);
                }
            }
            0x64 | 0x65 => cc = self.add_to_queue(ea, self.r[r1], op & 1 != 0)?, // ATL, ABL
            0x66 | 0x67 => cc = self.rem_from_queue(ea, r1, op & 1 != 0)?, // RTL, RBL
            0x5E => {
                // CRC12
                let opnd = opnd & DMASK16;
                let mut t = (self.r[r1] & 0x3F) ^ opnd;
                for _ in 0..6 {
                    t = if t & 1 != 0 { (t >> 1) ^ 0x0F01 } else { t >> 1 };
                }
                self.write_h(ea, t, Rel::Vw)?;
            }
            0x5F => {
                // CRC16
                let opnd = opnd & DMASK16;
                let mut t = (self.r[r1] & 0xFF) ^ opnd;
                for _ in 0..8 {
                    t = if t & 1 != 0 { (t >> 1) ^ 0xA001 } else { t >> 1 };
                }
                self.write_h(ea, t, Rel::Vw)?;
            }
            0xE7 => {
                // TLATE: translate a byte through a halfword table, with a
                // branch escape for special entries
                let t = (opnd + ((self.r[r1] & DMASK8) << 1)) & VAMASK;
                let rslt = self.read_h(t, Rel::Vr)?;
                if rslt & SIGN16 != 0 {
                    self.r[r1] = rslt & DMASK8;
                } else {
                    self.pcq_entry();
                    self.pc = rslt << 1;
                }
            }

            /* I/O */
            0xDE | 0x9E => {
                // OC, OCR
                let cmd = if op == 0xDE {
                    self.read_b(ea, Rel::Vr)?
                } else {
                    opnd
                };
                let dev = self.r[r1] & DEV_MAX;
                if self.fab.dev_acc(dev) {
                    self.fab.dev_io(dev, IoOp::Adr, 0);
                    self.fab.dev_io(dev, IoOp::Oc, cmd & DMASK8);
                    cc = 0;
                } else {
                    cc = CC_V;
                }
                self.int_eval();
            }
            0xDA | 0x9A => {
                // WD, WDR
                let dat = if op == 0xDA {
                    self.read_b(ea, Rel::Vr)?
                } else {
                    opnd
                };
                let dev = self.r[r1] & DEV_MAX;
                if self.fab.dev_acc(dev) {
                    self.fab.dev_io(dev, IoOp::Adr, 0);
                    self.fab.dev_io(dev, IoOp::Wd, dat & DMASK8);
                    cc = 0;
                } else {
                    cc = CC_V;
                }
                self.int_eval();
            }
            0xD8 | 0x98 => {
                // WH, WHR
                let dat = if op == 0xD8 {
                    self.read_h(ea, Rel::Vr)?
                } else {
                    opnd
                };
                let dev = self.r[r1] & DEV_MAX;
                if self.fab.dev_acc(dev) {
                    if self.fab.dev_io(dev, IoOp::Adr, 0) != 0 {
                        self.fab.dev_io(dev, IoOp::Wh, dat & DMASK16);
                    } else {
                        self.fab.dev_io(dev, IoOp::Wd, (dat >> 8) & DMASK8);
                        self.fab.dev_io(dev, IoOp::Wd, dat & DMASK8);
                    }
                    cc = 0;
                } else {
                    cc = CC_V;
                }
                self.int_eval();
            }
            0x9B | 0xDB => {
                // RDR, RD
                let dev = self.r[r1] & DEV_MAX;
                let t;
                if self.fab.dev_acc(dev) {
                    self.fab.dev_io(dev, IoOp::Adr, 0);
                    t = self.fab.dev_io(dev, IoOp::Rd, 0);
                    cc = 0;
                } else {
                    t = 0;
                    cc = CC_V;
                }
                if op_type(&DECROM, op) != OP_RR {
                    self.write_b(ea, t, Rel::Vw)?;
                } else {
                    self.r[r2] = t & DMASK8;
                }
                self.int_eval();
            }
            0x99 | 0xD9 => {
                // RHR, RH
                let dev = self.r[r1] & DEV_MAX;
                let t;
                if self.fab.dev_acc(dev) {
                    if self.fab.dev_io(dev, IoOp::Adr, 0) != 0 {
                        t = self.fab.dev_io(dev, IoOp::Rh, 0);
                    } else {
                        let hi = self.fab.dev_io(dev, IoOp::Rd, 0);
                        let lo = self.fab.dev_io(dev, IoOp::Rd, 0);
                        t = (hi << 8) | lo;
                    }
                    cc = 0;
                } else {
                    t = 0;
                    cc = CC_V;
                }
                if op_type(&DECROM, op) != OP_RR {
                    self.write_h(ea, t, Rel::Vw)?;
                } else {
                    self.r[r2] = t & DMASK16;
                }
                self.int_eval();
            }
            0x9D | 0xDD => {
                // SSR, SS
                let dev = self.r[r1] & DEV_MAX;
                let t = if self.fab.dev_acc(dev) {
                    self.fab.dev_io(dev, IoOp::Adr, 0);
                    self.fab.dev_io(dev, IoOp::Ss, 0)
                } else {
                    STA_EX
                };
                if op_type(&DECROM, op) != OP_RR {
                    self.write_b(ea, t, Rel::Vw)?;
                } else {
                    self.r[r2] = t & DMASK8;
                }
                cc = t & 0xF;
                self.int_eval();
            }

            /* Block I/O */
            0x96 | 0xD6 => {
                // WBR, WB
                let dev = self.r[r1] & DEV_MAX;
                if self.fab.dev_acc(dev) {
                    let lim = if op_type(&DECROM, op) != OP_RR {
                        self.read_f((ea + 4) & VAMASK, Rel::Vr)?
                    } else {
                        self.r[(r2 + 1) & 0xF]
                    };
                    if opnd > lim {
                        cc = 0;
                    } else {
                        self.fab.dev_io(dev, IoOp::Adr, 0);
                        self.blk = BlockIo {
                            dfl: dev,
                            cur: opnd,
                            end: lim,
                        };
                        self.qevent |= EV_BLK;
                    }
                } else {
                    cc = CC_V;
                }
            }
            0x97 | 0xD7 => {
                // RBR, RB
                let dev = self.r[r1] & DEV_MAX;
                if self.fab.dev_acc(dev) {
                    let lim = if op_type(&DECROM, op) != OP_RR {
                        self.read_f((ea + 4) & VAMASK, Rel::Vr)?
                    } else {
                        self.r[(r2 + 1) & 0xF]
                    };
                    if opnd > lim {
                        cc = 0;
                    } else {
                        self.fab.dev_io(dev, IoOp::Adr, 0);
                        self.blk = BlockIo {
                            dfl: dev | BL_RD,
                            cur: opnd,
                            end: lim,
                        };
                        self.qevent |= EV_BLK;
                    }
                } else {
                    cc = CC_V;
                }
            }
            0xD5 => {
                // AL
                let dev = self.read_b(AL_DEV, Rel::P)?;
                let t = self.read_b(AL_IOC, Rel::P)?;
                if self.fab.dev_acc(dev) {
                    if AL_BUF > ea {
                        cc = 0;
                    } else {
                        self.fab.dev_io(dev, IoOp::Adr, 0);
                        self.fab.dev_io(dev, IoOp::Oc, t);
                        self.blk = BlockIo {
                            dfl: dev | BL_RD | BL_LZ,
                            cur: AL_BUF,
                            end: ea,
                        };
                        self.qevent |= EV_BLK;
                    }
                } else {
                    cc = CC_V;
                }
            }

            _ => unreachable!("decoded opcode {op:#X} without an action"),
        }
        Ok(Ok(cc))
    }
}
