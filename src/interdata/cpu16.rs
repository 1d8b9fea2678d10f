//! Interdata 16b CPU (I3, I4, 7/16, 8/16, 8/16E).
//!
//! Sixteen general registers, single/double precision hex floating point,
//! a 16-bit PSW whose low nibble is the condition code, and four
//! instruction formats: register-register, short form, register-memory,
//! and register-storage. The model selects an instruction subset through
//! the decode ROM, the PSW mask, and whether FP lives in hardware or in
//! low memory. The 8/16E adds 18-bit physical addressing through two
//! relocation constants selected by the PSW map field.
//!
//! The interpreter owns the shared I/O fabric and drives events, block
//! I/O, interrupts (PSW-swap or auto-channel), and the wait state from
//! the top of its loop, between instructions.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use super::defs::*;
use super::fp::{self, Ufp};
use super::IdFabric;
use crate::StopReason;

const PCQ_SIZE: usize = 64;
const PCQ_MASK: usize = PCQ_SIZE - 1;
const VAMASK: u32 = VAMASK16;
const VA_S1: u32 = 0x8000; /* S0/S1 select */

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Id16Model {
    I3,
    I4,
    M716,
    M816,
    M816E,
}

/// Instruction decode ROM: operand shape, model restrictions, privilege
#[rustfmt::skip]
const DECROM: [u16; 256] = [
    0,                                                  /* 00 */
    OP_RR,                                              /* BALR */
    OP_RR,                                              /* BTCR */
    OP_RR,                                              /* BFCR */
    OP_RR,                                              /* NHR */
    OP_RR,                                              /* CLHR */
    OP_RR,                                              /* OHR */
    OP_RR,                                              /* XHR */
    OP_RR,                                              /* LHR */
    OP_RR | OP_716,                                     /* CHR */
    OP_RR,                                              /* AHR */
    OP_RR,                                              /* SHR */
    OP_RR,                                              /* MHR */
    OP_RR,                                              /* DHR */
    OP_RR,                                              /* ACHR */
    OP_RR,                                              /* SCHR */
    0, 0, 0,                                            /* 10:12 */
    OP_RR | OP_816E | OP_PRV,                           /* SETMR */
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,                 /* 14:1F */
    OP_NO | OP_716,                                     /* BTBS */
    OP_NO | OP_716,                                     /* BTFS */
    OP_NO | OP_716,                                     /* BFBS */
    OP_NO | OP_716,                                     /* BFFS */
    OP_NO | OP_716,                                     /* LIS */
    OP_NO | OP_716,                                     /* LCS */
    OP_NO | OP_716,                                     /* AIS */
    OP_NO | OP_716,                                     /* SIS */
    OP_NO | OP_ID4,                                     /* LER */
    OP_NO | OP_ID4,                                     /* CER */
    OP_NO | OP_ID4,                                     /* AER */
    OP_NO | OP_ID4,                                     /* SER */
    OP_NO | OP_ID4,                                     /* MER */
    OP_NO | OP_ID4,                                     /* DER */
    OP_NO | OP_816,                                     /* FXR */
    OP_NO | OP_816,                                     /* FLR */
    0, 0, 0,                                            /* 30:32 */
    OP_NO | OP_816E | OP_PRV,                           /* LPSR */
    0, 0, 0, 0,                                         /* 34:37 */
    OP_NO | OP_816 | OP_DPF,                            /* LDR */
    OP_NO | OP_816 | OP_DPF,                            /* CDR */
    OP_NO | OP_816 | OP_DPF,                            /* ADR */
    OP_NO | OP_816 | OP_DPF,                            /* SDR */
    OP_NO | OP_816 | OP_DPF,                            /* MDR */
    OP_NO | OP_816 | OP_DPF,                            /* DDR */
    OP_NO | OP_816 | OP_DPF,                            /* FXDR */
    OP_NO | OP_816 | OP_DPF,                            /* FLDR */
    OP_RX,                                              /* STH */
    OP_RX,                                              /* BAL */
    OP_RX,                                              /* BTC */
    OP_RX,                                              /* BFC */
    OP_RXH,                                             /* NH */
    OP_RXH,                                             /* CLH */
    OP_RXH,                                             /* OH */
    OP_RXH,                                             /* XH */
    OP_RXH,                                             /* LH */
    OP_RXH | OP_716,                                    /* CH */
    OP_RXH,                                             /* AH */
    OP_RXH,                                             /* SH */
    OP_RXH,                                             /* MH */
    OP_RXH,                                             /* DH */
    OP_RXH,                                             /* ACH */
    OP_RXH,                                             /* SCH */
    0, 0, 0,                                            /* 50:52 */
    OP_RXH | OP_816E | OP_PRV,                          /* SETM */
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,                 /* 54:5F */
    OP_RX | OP_ID4,                                     /* STE */
    OP_RXH | OP_716,                                    /* AHM */
    0, 0,                                               /* 62:63 */
    OP_RX | OP_716,                                     /* ATL */
    OP_RX | OP_716,                                     /* ABL */
    OP_RX | OP_716,                                     /* RTL */
    OP_RX | OP_716,                                     /* RBL */
    OP_RX | OP_ID4,                                     /* LE */
    OP_RX | OP_ID4,                                     /* CE */
    OP_RX | OP_ID4,                                     /* AE */
    OP_RX | OP_ID4,                                     /* SE */
    OP_RX | OP_ID4,                                     /* ME */
    OP_RX | OP_ID4,                                     /* DE */
    0, 0,                                               /* 6E:6F */
    OP_RX | OP_816 | OP_DPF,                            /* STD */
    OP_RX | OP_816,                                     /* STME */
    OP_RX | OP_816,                                     /* LME */
    OP_RXH | OP_816E | OP_PRV,                          /* LPS */
    0, 0, 0, 0,                                         /* 74:77 */
    OP_RX | OP_816 | OP_DPF,                            /* LD */
    OP_RX | OP_816 | OP_DPF,                            /* CD */
    OP_RX | OP_816 | OP_DPF,                            /* AD */
    OP_RX | OP_816 | OP_DPF,                            /* SD */
    OP_RX | OP_816 | OP_DPF,                            /* MD */
    OP_RX | OP_816 | OP_DPF,                            /* DD */
    OP_RX | OP_816 | OP_DPF,                            /* STMD */
    OP_RX | OP_816 | OP_DPF,                            /* LMD */
    0, 0, 0, 0, 0, 0, 0, 0,                             /* 80:8F */
    0, 0, 0, 0, 0, 0, 0, 0,
    OP_NO | OP_716,                                     /* SRLS */
    OP_NO | OP_716,                                     /* SLLS */
    OP_NO,                                              /* STBR */
    OP_RR,                                              /* LDBR */
    OP_RR | OP_716,                                     /* EXBR */
    OP_NO | OP_716 | OP_PRV,                            /* EPSR */
    OP_RR | OP_PRV,                                     /* WBR */
    OP_RR | OP_PRV,                                     /* RBR */
    OP_RR | OP_716 | OP_PRV,                            /* WHR */
    OP_RR | OP_716 | OP_PRV,                            /* RHR */
    OP_RR | OP_PRV,                                     /* WDR */
    OP_RR | OP_PRV,                                     /* RDR */
    OP_RR | OP_716,                                     /* MHUR */
    OP_RR | OP_PRV,                                     /* SSR */
    OP_RR | OP_PRV,                                     /* OCR */
    OP_RR | OP_PRV,                                     /* AIR */
    0, 0, 0, 0, 0, 0, 0, 0,                             /* A0:AF */
    0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0,                             /* B0:BF */
    0, 0, 0, 0, 0, 0, 0, 0,
    OP_RX,                                              /* BXH */
    OP_RX,                                              /* BXLE */
    OP_RX | OP_PRV,                                     /* LPSW */
    OP_RS | OP_716,                                     /* THI */
    OP_RS,                                              /* NHI */
    OP_RS,                                              /* CLHI */
    OP_RS,                                              /* OHI */
    OP_RS,                                              /* XHI */
    OP_RS,                                              /* LHI */
    OP_RS | OP_716,                                     /* CHI */
    OP_RS,                                              /* AHI */
    OP_RS,                                              /* SHI */
    OP_RS,                                              /* SRHL */
    OP_RS,                                              /* SLHL */
    OP_RS,                                              /* SRHA */
    OP_RS,                                              /* SLHA */
    OP_RX | OP_ID4,                                     /* STM */
    OP_RX | OP_ID4,                                     /* LM */
    OP_RX,                                              /* STB */
    OP_RXB,                                             /* LDB */
    OP_RXB | OP_716,                                    /* CLB */
    OP_RX | OP_ID4 | OP_PRV,                            /* AL */
    OP_RXH | OP_PRV,                                    /* WB */
    OP_RXH | OP_PRV,                                    /* RB */
    OP_RX | OP_716 | OP_PRV,                            /* WH */
    OP_RX | OP_716 | OP_PRV,                            /* RH */
    OP_RX | OP_PRV,                                     /* WD */
    OP_RX | OP_PRV,                                     /* RD */
    OP_RXH | OP_716,                                    /* MHU */
    OP_RX | OP_PRV,                                     /* SS */
    OP_RX | OP_PRV,                                     /* OC */
    OP_RX | OP_PRV,                                     /* AI */
    0,                                                  /* E0 */
    OP_RX | OP_716,                                     /* SVC */
    OP_RS | OP_716 | OP_PRV,                            /* SINT */
    0, 0, 0, 0, 0, 0, 0,                                /* E3:E9 */
    OP_RS | OP_716,                                     /* RRL */
    OP_RS | OP_716,                                     /* RLL */
    OP_RS | OP_716,                                     /* SRL */
    OP_RS | OP_716,                                     /* SLL */
    OP_RS | OP_716,                                     /* SRA */
    OP_RS | OP_716,                                     /* SLA */
    0, 0, 0, 0, 0, 0, 0, 0,                             /* F0:FF */
    0, 0, 0, 0, 0, 0, 0, 0,
];

/// 8/16E relocation constants for the low segment, indexed by PSW map
const S0_REL_CONST: [u32; 16] = [
    0x00000, 0x00000, 0x00000, 0x00000, /* 0 = no relocation */
    0x00000, 0x00000, 0x00000, 0x08000, /* 8000 = relocate to S1 */
    0x08000, 0x08000, 0x08000, 0x08000,
    0x08000, 0x08000, 0x08000, 0x00000,
];

/// 8/16E relocation constants for the high segment; the constant must
/// subtract out the segment base
const S1_REL_CONST: [u32; 16] = [
    0x00000, 0x08000, 0x10000, 0x18000,
    0x20000, 0x28000, 0x30000, 0xFFF8000,
    0x00000, 0x08000, 0x10000, 0x18000,
    0x20000, 0x28000, 0x30000, 0x00000,
];

/// Instruction history entry
#[derive(Debug, Clone, Copy, Default)]
pub struct Hist16 {
    pub valid: bool,
    pub pc: u32,
    pub ir1: u32,
    pub ir2: u32,
    pub r1: u32,
    pub ea: u32,
    pub opnd: u32,
}

#[derive(Debug)]
pub struct Id16System {
    pub fab: IdFabric,
    model: Id16Model,
    psw_mask: u32,
    dec_flgs: u16,
    fp_in_hwre: bool,
    /// General registers
    pub r: [u32; 16],
    /// Single precision FP registers (hardware copy)
    pub fregs: [u32; 8],
    /// Double precision FP registers (high, low)
    pub dregs: [(u32, u32); 8],
    pub psw: u32,
    pub pc: u32,
    s0_rel: u32,
    s1_rel: u32,
    qevent: u32,
    blk: BlockIo,
    /// Stop instead of trapping on an illegal opcode
    pub stop_inst: bool,
    pcq: [u32; PCQ_SIZE],
    pcq_p: usize,
    hist: Vec<Hist16>,
    hist_p: usize,
    breakpoints: BTreeSet<u32>,
    devtab_ok: bool,
}

impl Id16System {
    pub fn new(model: Id16Model) -> Self {
        let pawidth = if model == Id16Model::M816E {
            PAWIDTH16E
        } else {
            PAWIDTH16
        };
        let mut sys = Self {
            fab: IdFabric::new(pawidth, MAXMEMSIZE16E, 2, true),
            model,
            psw_mask: 0,
            dec_flgs: 0,
            fp_in_hwre: false,
            r: [0; 16],
            fregs: [0; 8],
            dregs: [(0, 0); 8],
            psw: 0,
            pc: 0,
            s0_rel: 0,
            s1_rel: 0,
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
        sys.apply_model();
        if model != Id16Model::M816E {
            sys.fab.mem.set_size(MAXMEMSIZE16, true).unwrap();
        }
        sys.fab.display.wide_pos = matches!(model, Id16Model::M716 | Id16Model::M816);
        sys.reset();
        sys
    }

    fn apply_model(&mut self) {
        let (dec, hwre, mask) = match self.model {
            Id16Model::M816E => (0, true, PSW_816E),
            Id16Model::M816 => (OP_816E, true, PSW_X16),
            Id16Model::M716 => (OP_816 | OP_816E, false, PSW_X16),
            Id16Model::I4 => (OP_716 | OP_816 | OP_816E, false, PSW_ID4),
            Id16Model::I3 => (OP_ID4 | OP_716 | OP_816 | OP_816E, false, PSW_ID4),
        };
        self.dec_flgs = dec;
        self.fp_in_hwre = hwre;
        self.psw_mask = mask;
    }

    pub fn model(&self) -> Id16Model {
        self.model
    }

    fn cpu_x16(&self) -> bool {
        self.model >= Id16Model::M716
    }

    /// Power-on reset: PSW, events, block I/O, devices
    pub fn reset(&mut self) {
        self.qevent = 0;
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

    /// Size or clear the instruction history ring
    pub fn set_history(&mut self, n: usize) {
        self.hist = vec![Hist16::default(); n];
        self.hist_p = 0;
    }

    pub fn history(&self) -> impl Iterator<Item = &Hist16> {
        let split = self.hist_p;
        self.hist[split..]
            .iter()
            .chain(self.hist[..split].iter())
            .filter(|h| h.valid)
    }

    pub fn pc_queue(&self) -> [u32; PCQ_SIZE] {
        self.pcq
    }

    /* Memory access: logical addresses through the 8/16E relocation
       constants, then the physical store */

    fn pa(&self, loc: u32) -> u32 {
        let rel = if loc & VA_S1 != 0 {
            self.s1_rel
        } else {
            self.s0_rel
        };
        loc.wrapping_add(rel) & PAMASK16E
    }

    pub fn read_b(&self, loc: u32) -> u32 {
        self.fab.mem.io_read_b(self.pa(loc & VAMASK))
    }

    pub fn read_h(&self, loc: u32) -> u32 {
        self.fab.mem.io_read_h(self.pa(loc & VAMASK))
    }

    pub fn write_b(&mut self, loc: u32, val: u32) {
        let pa = self.pa(loc & VAMASK);
        self.fab.mem.io_write_b(pa, val & DMASK8);
    }

    pub fn write_h(&mut self, loc: u32, val: u32) {
        let pa = self.pa(loc & VAMASK);
        self.fab.mem.io_write_h(pa, val & DMASK16);
    }

    /// Fullword read as two halfwords; `rel` selects relocated or
    /// physical access (FP registers kept in core are physical)
    pub fn read_f(&self, loc: u32, rel: bool) -> u32 {
        let loc = loc & VAMASK;
        let loc1 = (loc + 2) & VAMASK;
        let (pa, pa1) = if rel {
            (self.pa(loc), self.pa(loc1))
        } else {
            (loc, loc1)
        };
        (self.fab.mem.io_read_h(pa) << 16) | self.fab.mem.io_read_h(pa1)
    }

    pub fn write_f(&mut self, loc: u32, val: u32, rel: bool) {
        let loc = loc & VAMASK;
        let loc1 = (loc + 2) & VAMASK;
        let (pa, pa1) = if rel {
            (self.pa(loc), self.pa(loc1))
        } else {
            (loc, loc1)
        };
        self.fab.mem.io_write_h(pa, (val >> 16) & DMASK16);
        self.fab.mem.io_write_h(pa1, val & DMASK16);
    }

    /* PSW handling */

    fn build_psw(&self, cc: u32) -> u32 {
        ((self.psw & !CC_MASK) | cc) & self.psw_mask
    }

    fn int_eval(&mut self) {
        if self.fab.ints.eval() {
            self.qevent |= EV_INT;
        } else {
            self.qevent &= !EV_INT;
        }
    }

    /// Load a new PSW: mask, refresh relocation constants, track the wait
    /// state and the console interrupt enable. Returns the new CC.
    pub fn new_psw(&mut self, val: u32) -> u32 {
        self.psw = val & self.psw_mask;
        self.int_eval();
        if self.psw & PSW_WAIT != 0 {
            self.qevent |= EV_WAIT;
        } else {
            self.qevent &= !EV_WAIT;
        }
        if self.model == Id16Model::M816E {
            let map = psw_get_map(self.psw) as usize;
            self.s0_rel = S0_REL_CONST[map];
            self.s1_rel = S1_REL_CONST[map];
        } else {
            self.s0_rel = 0;
            self.s1_rel = 0;
        }
        if self.psw & PSW_AIO != 0 {
            self.fab.ints.set_enb(V_DS);
        } else {
            self.fab.ints.clr_enb(V_DS);
        }
        self.psw & CC_MASK
    }

    /// Exception convention: swap the PSW/PC pair at `loc` with the
    /// current state
    fn swap_psw(&mut self, loc: u32, cc: u32) -> u32 {
        self.write_h(loc, self.build_psw(cc));
        self.write_h(loc + 2, self.pc);
        let cc = self.new_psw(self.read_h(loc + 4));
        self.pc = self.read_h(loc + 6);
        debug!(loc, pc = self.pc, psw = self.psw, "exception");
        if self.psw & PSW_SQI != 0 {
            return self.test_sysq(cc);
        }
        cc
    }

    /// System-queue interrupt test after any PSW load that enables it
    fn test_sysq(&mut self, cc: u32) -> u32 {
        let qb = self.read_h(SQP);
        let usd = self.read_b(qb + Q16_USD);
        if usd != 0 {
            self.write_h(SQIPSW, self.build_psw(cc));
            self.write_h(SQIPSW + 2, self.pc);
            let cc = self.new_psw(self.read_h(SQIPSW + 4));
            self.pc = self.read_h(SQIPSW + 6);
            return cc;
        }
        cc
    }

    /* Circular list primitives, shared by ATL/ABL/RTL/RBL and the
       auto-interrupt engine. The 16b header is byte-wide. */

    fn add_to_queue(&mut self, ea: u32, val: u32, bot: bool) -> u32 {
        let t = self.read_h(ea);
        let slt = (t >> 8) & DMASK8;
        let usd = t & DMASK8;
        if usd >= slt {
            return CC_V;
        }
        self.write_b(ea + Q16_USD, usd + 1);
        let wra = if bot {
            let wra = self.read_b((ea + Q16_BOT) & VAMASK);
            let mut t = wra + 1;
            if t >= slt {
                t = 0;
            }
            self.write_b((ea + Q16_BOT) & VAMASK, t);
            wra
        } else {
            let mut wra = self.read_b((ea + Q16_TOP) & VAMASK);
            if wra == 0 {
                wra = (slt - 1) & DMASK8;
            } else {
                wra -= 1;
            }
            self.write_b((ea + Q16_TOP) & VAMASK, wra);
            wra
        };
        self.write_h((ea + Q16_BASE + wra * Q16_SLNT) & VAMASK, val);
        0
    }

    fn rem_from_queue(&mut self, ea: u32, r1: u32, bot: bool) -> u32 {
        let t = self.read_h(ea);
        let slt = (t >> 8) & DMASK8;
        let usd = t & DMASK8;
        if usd == 0 {
            return CC_V;
        }
        let usd = usd - 1;
        self.write_b(ea + Q16_USD, usd);
        let rda = if bot {
            let mut rda = self.read_b((ea + Q16_BOT) & VAMASK);
            if rda == 0 {
                rda = (slt - 1) & DMASK8;
            } else {
                rda -= 1;
            }
            self.write_b((ea + Q16_BOT) & VAMASK, rda);
            rda
        } else {
            let rda = self.read_b((ea + Q16_TOP) & VAMASK);
            let mut t = rda + 1;
            if t >= slt {
                t = 0;
            }
            self.write_b((ea + Q16_TOP) & VAMASK, t);
            rda
        };
        self.r[r1 as usize] = self.read_h((ea + Q16_BASE + rda * Q16_SLNT) & VAMASK);
        if usd != 0 {
            CC_G
        } else {
            0
        }
    }

    /* Automatic interrupt engine (channel command words in memory) */

    fn ccw_err(ccw: u32) -> u32 {
        (ccw | CCW16_INIT | CCW16_NOP | CCW16_Q) & !(CCW16_CHN | CCW16_CON | CCW16_HI)
    }

    fn ccb(vec: u32, off: i32) -> u32 {
        vec.wrapping_add(off as u32) & VAMASK
    }

    /// Deliver an interrupt for `dev` through the service vector table:
    /// either an immediate PSW exchange, or one pass of the channel
    /// command program the vector points at.
    pub fn int_auto(&mut self, dev: u32, mut cc: u32) -> u32 {
        let mut sysqe = false;
        loop {
            let vec = self.read_h(INTSVT + 2 * dev);
            if vec & 1 == 0 {
                // immediate interrupt: PSW exchange through the vector
                self.write_h(vec, self.build_psw(cc));
                self.write_h((vec + 2) & VAMASK, self.pc);
                cc = self.new_psw(self.read_h((vec + 4) & VAMASK));
                self.pc = (vec + 6) & VAMASK;
                trace!(dev, pc = self.pc, "immediate interrupt");
                return cc;
            }
            let vec = vec & !1;
            let mut ccw = self.read_h(vec);
            if self.fab.dev_acc(dev) {
                self.fab.dev_io(dev, IoOp::Adr, 0);
            }
            if ccw & CCW16_NOP != 0 {
                break;
            }
            if ccw & CCW16_INIT != 0 {
                ccw &= !CCW16_INIT;
                self.write_h(vec, ccw);
                if ccw & CCW16_OC != 0 {
                    if self.fab.dev_acc(dev) {
                        let by = self.read_b(Self::ccb(vec, CCB16_IOC));
                        self.fab.dev_io(dev, IoOp::Oc, by);
                    }
                    break;
                }
            }
            let fnc = ccw16_fnc(ccw);
            let mut st = 0;
            if fnc == CCW16_DMT {
                // decrement a memory counter; interrupt only at zero
                let ba = self.read_h(Self::ccb(vec, CCB16_STR));
                let ba = ba.wrapping_sub(1) & DMASK16;
                self.write_h(Self::ccb(vec, CCB16_STR), ba);
                if ba != 0 {
                    break;
                }
            } else if fnc != CCW16_NUL {
                st = if self.fab.dev_acc(dev) {
                    self.fab.dev_io(dev, IoOp::Ss, 0)
                } else {
                    CC_V
                };
                if st & 0xF != 0 {
                    ccw = Self::ccw_err(ccw);
                    self.write_h(vec, ccw);
                } else {
                    let bpi = match ccw16_bpi(ccw) {
                        0 => 16,
                        n => n,
                    };
                    let mut ba = self.read_h(Self::ccb(vec, CCB16_STR));
                    let mut by = 0;
                    for _ in 0..bpi {
                        if fnc == CCW16_RD {
                            by = self.fab.dev_io(dev, IoOp::Rd, 0);
                            self.write_b(ba, by);
                        } else {
                            by = self.read_b(ba);
                            self.fab.dev_io(dev, IoOp::Wd, by);
                        }
                        ba = (ba + 1) & VAMASK;
                    }
                    self.write_h(Self::ccb(vec, CCB16_STR), ba);
                    let ea = self.read_h(Self::ccb(vec, CCB16_END));
                    let trm = self.read_b(Self::ccb(vec, CCB16_TRM));
                    if ba <= ea && (ccw & CCW16_TRM == 0 || by != trm) {
                        break;
                    }
                    ccw |= CCW16_NOP;
                    self.write_h(vec, ccw);
                }
            }

            // termination: post device/status, queue, chain
            let t = (dev << 8) | (st & DMASK8);
            self.write_h(Self::ccb(vec, CCB16_DEV), t);
            if ccw & CCW16_Q != 0 {
                let qb = self.read_h(SQP);
                if self.add_to_queue(qb, vec, ccw & CCW16_HI == 0) != 0 {
                    self.write_h(SQOP, vec);
                    return self.swap_psw(SQVPSW, cc);
                }
                sysqe = true;
            }
            let mut rpt = false;
            if ccw & CCW16_CHN != 0 {
                let t = self.read_h(Self::ccb(vec, CCB16_CHN));
                self.write_h(INTSVT + 2 * dev, t);
                if ccw & CCW16_CON != 0 {
                    rpt = true;
                }
            }
            if !rpt {
                break;
            }
        }
        if sysqe && self.psw & PSW_SQI != 0 {
            return self.swap_psw(SQIPSW, cc);
        }
        cc
    }

    /* Floating point operand routing: single precision registers live in
       hardware or in low memory depending on the model */

    fn read_freg(&self, r: u32) -> u32 {
        if self.fp_in_hwre {
            self.fregs[(r >> 1) as usize]
        } else {
            self.read_f((r << 1) & !3, false)
        }
    }

    fn write_freg(&mut self, r: u32, val: u32) {
        if self.fp_in_hwre {
            self.fregs[(r >> 1) as usize] = val;
        } else {
            self.write_f((r << 1) & !3, val, false);
        }
    }

    fn fp_op2(&self, op: u32, r2: u32, ea: u32, dp: bool) -> Ufp {
        if op_type(&DECROM, op) > OP_RR {
            let hi = self.read_f(ea, true);
            let lo = if dp { self.read_f(ea + 4, true) } else { 0 };
            Ufp::unpack(hi, lo)
        } else if dp {
            let (h, l) = self.dregs[(r2 >> 1) as usize];
            Ufp::unpack(h, l)
        } else {
            Ufp::unpack(self.read_freg(r2), 0)
        }
    }

    fn fp_op1(&self, r1: u32, dp: bool) -> Ufp {
        if dp {
            let (h, l) = self.dregs[(r1 >> 1) as usize];
            Ufp::unpack(h, l)
        } else {
            Ufp::unpack(self.read_freg(r1), 0)
        }
    }

    fn fp_store(&mut self, packed: fp::Packed, r1: u32, dp: bool) -> u32 {
        let (hi, lo, cc) = packed;
        if dp {
            self.dregs[(r1 >> 1) as usize] = (hi, lo);
        } else {
            self.write_freg(r1, hi);
        }
        cc
    }

    /// Arm/swap on a floating fault when the model takes them
    fn fp_fault(&mut self, cc: u32) -> u32 {
        if cc & CC_V != 0 && self.psw & PSW_FPF != 0 && self.cpu_x16() {
            return self.swap_psw(FPFPSW, cc);
        }
        cc
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
        self.apply_model();
        self.int_eval();
        let mut cc = self.new_psw(self.psw & self.psw_mask);
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
                if self.qevent & EV_BLK != 0 {
                    if let Some(r) = self.blk_io_cycle() {
                        break r;
                    }
                    continue;
                }
                if self.qevent & EV_INT != 0 && self.psw & PSW_EXI != 0 {
                    if self.psw & PSW_AIO != 0 {
                        let dev = self.fab.ints.getdev();
                        cc = self.int_auto(dev, cc);
                    } else {
                        cc = self.swap_psw(EXIPSW, cc);
                    }
                    self.int_eval();
                    continue;
                }
                if self.psw & PSW_WAIT != 0 {
                    // idle until the next scheduled event
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
                Ok(new_cc) => cc = new_cc,
                Err(r) => break r,
            }
        };
        self.psw = self.build_psw(cc);
        self.pc &= VAMASK;
        reason
    }

    /// One iteration of the block-I/O drain. Returns a stop reason only
    /// if the transfer can never complete.
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
                self.write_b(self.blk.cur, t);
            } else {
                let t = self.read_b(self.blk.cur);
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

    fn pcq_entry(&mut self, opc: u32) {
        self.pcq_p = (self.pcq_p.wrapping_sub(1)) & PCQ_MASK;
        self.pcq[self.pcq_p] = opc;
    }

    /// Fetch, decode, and execute one instruction
    fn exec_one(&mut self, mut cc: u32) -> Result<u32, StopReason> {
        let o_pc = self.pc;
        let ir1 = self.read_h(o_pc);
        let op = (ir1 >> 8) & 0xFF;
        let r1 = (ir1 >> 4) & 0xF;
        let r2 = ir1 & 0xF;
        let drom = DECROM[op as usize];
        let ityp = drom & OP_MASK;

        if drom == 0 || drom & self.dec_flgs != 0 {
            if self.stop_inst {
                return Err(StopReason::IllegalInstruction);
            }
            return Ok(self.swap_psw(ILOPSW, cc));
        }
        if drom & OP_PRV != 0 && self.psw & PSW_PRO != 0 {
            return Ok(self.swap_psw(ILOPSW, cc));
        }

        let mut ea = 0;
        let mut ir2 = 0;
        let opnd = match ityp {
            OP_NO => r2,
            OP_RR => self.r[r2 as usize],
            OP_RS | OP_RX => {
                self.pc = (self.pc + 2) & VAMASK;
                ir2 = self.read_h(self.pc);
                ea = ir2;
                if r2 != 0 {
                    ea = (ir2 + self.r[r2 as usize]) & VAMASK;
                }
                ea
            }
            OP_RXB => {
                self.pc = (self.pc + 2) & VAMASK;
                ir2 = self.read_h(self.pc);
                ea = ir2;
                if r2 != 0 {
                    ea = (ir2 + self.r[r2 as usize]) & VAMASK;
                }
                self.read_b(ea)
            }
            OP_RXH => {
                self.pc = (self.pc + 2) & VAMASK;
                ir2 = self.read_h(self.pc);
                ea = ir2;
                if r2 != 0 {
                    ea = (ir2 + self.r[r2 as usize]) & VAMASK;
                }
                self.read_h(ea)
            }
            _ => unreachable!(),
        };

        if !self.hist.is_empty() {
            let p = self.hist_p;
            self.hist[p] = Hist16 {
                valid: true,
                pc: o_pc,
                ir1,
                ir2,
                r1: self.r[r1 as usize],
                ea,
                opnd,
            };
            self.hist_p = (self.hist_p + 1) % self.hist.len();
        }

        self.pc = (self.pc + 2) & VAMASK;
        let r1 = r1 as usize;
        let r1p1 = (r1 + 1) & 0xF;
        let dp = drom & OP_DPF != 0;

        match op {
            /* Load/store */
            0x08 | 0x24 | 0x48 | 0xC8 => {
                // LHR, LIS, LH, LHI
                self.r[r1] = opnd;
                cc = cc_gl_16(self.r[r1]);
            }
            0x25 => {
                // LCS
                self.r[r1] = opnd.wrapping_neg() & DMASK16;
                cc = cc_gl_16(self.r[r1]);
            }
            0x40 => self.write_h(ea, self.r[r1]), // STH
            0xD1 => {
                // LM
                let mut ea = ea;
                for i in r1..16 {
                    self.r[i] = self.read_h(ea);
                    ea = (ea + 2) & VAMASK;
                }
            }
            0xD0 => {
                // STM
                let mut ea = ea;
                for i in r1..16 {
                    self.write_h(ea, self.r[i]);
                    ea = (ea + 2) & VAMASK;
                }
            }
            0x93 | 0xD3 => self.r[r1] = opnd & DMASK8, // LDBR, LDB
            0x92 => {
                // STBR
                self.r[r2 as usize] = (self.r[r2 as usize] & !DMASK8) | (self.r[r1] & DMASK8);
            }
            0xD2 => self.write_b(ea, self.r[r1] & DMASK8), // STB
            0x94 => self.r[r1] = ((opnd >> 8) | ((opnd & DMASK8) << 8)) & DMASK16, // EXBR

            /* Control */
            0x01 | 0x41 => {
                // BALR, BAL
                self.pcq_entry(o_pc);
                self.r[r1] = self.pc;
                self.pc = opnd;
            }
            0x02 | 0x42 => {
                // BTCR, BTC
                if cc & r1 as u32 != 0 {
                    self.pcq_entry(o_pc);
                    self.pc = opnd;
                }
            }
            0x20 => {
                // BTBS
                if cc & r1 as u32 != 0 {
                    self.pcq_entry(o_pc);
                    self.pc = o_pc.wrapping_sub(r2 + r2) & VAMASK;
                }
            }
            0x21 => {
                // BTFS
                if cc & r1 as u32 != 0 {
                    self.pcq_entry(o_pc);
                    self.pc = (o_pc + r2 + r2) & VAMASK;
                }
            }
            0x03 | 0x43 => {
                // BFCR, BFC
                if cc & r1 as u32 == 0 {
                    self.pcq_entry(o_pc);
                    self.pc = opnd;
                }
            }
            0x22 => {
                // BFBS
                if cc & r1 as u32 == 0 {
                    self.pcq_entry(o_pc);
                    self.pc = o_pc.wrapping_sub(r2 + r2) & VAMASK;
                }
            }
            0x23 => {
                // BFFS
                if cc & r1 as u32 == 0 {
                    self.pcq_entry(o_pc);
                    self.pc = (o_pc + r2 + r2) & VAMASK;
                }
            }
            0xC0 => {
                // BXH
                let inc = self.r[r1p1];
                let lim = self.r[(r1 + 2) & 0xF];
                self.r[r1] = (self.r[r1] + inc) & DMASK16;
                if self.r[r1] > lim {
                    self.pcq_entry(o_pc);
                    self.pc = opnd;
                }
            }
            0xC1 => {
                // BXLE
                let inc = self.r[r1p1];
                let lim = self.r[(r1 + 2) & 0xF];
                self.r[r1] = (self.r[r1] + inc) & DMASK16;
                if self.r[r1] <= lim {
                    self.pcq_entry(o_pc);
                    self.pc = opnd;
                }
            }

            /* Logical */
            0x04 | 0x44 | 0xC4 => {
                // NHR, NH, NHI
                self.r[r1] &= opnd;
                cc = cc_gl_16(self.r[r1]);
            }
            0x06 | 0x46 | 0xC6 => {
                // OHR, OH, OHI
                self.r[r1] |= opnd;
                cc = cc_gl_16(self.r[r1]);
            }
            0x07 | 0x47 | 0xC7 => {
                // XHR, XH, XHI
                self.r[r1] ^= opnd;
                cc = cc_gl_16(self.r[r1]);
            }
            0xC3 => cc = cc_gl_16(self.r[r1] & opnd), // THI
            0x05 | 0x45 | 0xC5 => {
                // CLHR, CLH, CLHI
                let rslt = self.r[r1].wrapping_sub(opnd) & DMASK16;
                cc = cc_gl_16(rslt);
                if self.r[r1] < opnd {
                    cc |= CC_C;
                }
                if ((self.r[r1] ^ opnd) & (!opnd ^ rslt)) & SIGN16 != 0 {
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

            /* Shifts */
            0xCC | 0x90 => {
                // SRHL, SRLS
                let sc = if op == 0xCC { opnd & 0xF } else { opnd };
                let rslt = self.r[r1] >> sc;
                cc = cc_gl_16(rslt);
                if sc != 0 && (self.r[r1] >> (sc - 1)) & 1 != 0 {
                    cc |= CC_C;
                }
                self.r[r1] = rslt;
            }
            0xCD | 0x91 => {
                // SLHL, SLLS
                let sc = if op == 0xCD { opnd & 0xF } else { opnd };
                let rslt = self.r[r1] << sc;
                self.r[r1] = rslt & DMASK16;
                cc = cc_gl_16(self.r[r1]);
                if sc != 0 && rslt & 0x10000 != 0 {
                    cc |= CC_C;
                }
            }
            0xCE => {
                // SRHA
                let sc = opnd & 0xF;
                let rslt = (sext16(self.r[r1]) >> sc) as u32 & DMASK16;
                cc = cc_gl_16(rslt);
                if sc != 0 && (self.r[r1] >> (sc - 1)) & 1 != 0 {
                    cc |= CC_C;
                }
                self.r[r1] = rslt;
            }
            0xCF => {
                // SLHA
                let sc = opnd & 0xF;
                let rslt = self.r[r1] << sc;
                self.r[r1] = (self.r[r1] & SIGN16) | (rslt & MMASK16);
                cc = cc_gl_16(self.r[r1]);
                if sc != 0 && rslt & SIGN16 != 0 {
                    cc |= CC_C;
                }
            }
            0xEA | 0xEB => {
                // RRL, RLL: rotate the register pair
                let sc = opnd & 0x1F;
                let t = (self.r[r1] << 16) | self.r[r1p1];
                let rslt = if sc == 0 {
                    t
                } else if op == 0xEA {
                    t.rotate_right(sc)
                } else {
                    t.rotate_left(sc)
                };
                cc = cc_gl_32(rslt);
                self.r[r1] = (rslt >> 16) & DMASK16;
                self.r[r1p1] = rslt & DMASK16;
            }
            0xEC | 0xED => {
                // SRL, SLL
                let sc = opnd & 0x1F;
                let t = (self.r[r1] << 16) | self.r[r1p1];
                let rslt = if op == 0xEC {
                    t.checked_shr(sc).unwrap_or(0)
                } else {
                    t.checked_shl(sc).unwrap_or(0)
                };
                cc = cc_gl_32(rslt);
                if sc != 0 {
                    let out = if op == 0xEC {
                        (t >> (sc - 1)) & 1 != 0
                    } else {
                        (t << (sc - 1)) & SIGN32 != 0
                    };
                    if out {
                        cc |= CC_C;
                    }
                }
                self.r[r1] = (rslt >> 16) & DMASK16;
                self.r[r1p1] = rslt & DMASK16;
            }
            0xEE => {
                // SRA
                let sc = opnd & 0x1F;
                let t = (self.r[r1] << 16) | self.r[r1p1];
                let rslt = ((t as i32) >> sc) as u32;
                cc = cc_gl_32(rslt);
                if sc != 0 && (t >> (sc - 1)) & 1 != 0 {
                    cc |= CC_C;
                }
                self.r[r1] = (rslt >> 16) & DMASK16;
                self.r[r1p1] = rslt & DMASK16;
            }
            0xEF => {
                // SLA
                let sc = opnd & 0x1F;
                let t = (self.r[r1] << 16) | self.r[r1p1];
                let shifted = t.checked_shl(sc).unwrap_or(0);
                let rslt = (t & SIGN32) | (shifted & MMASK32);
                cc = cc_gl_32(rslt);
                if sc != 0 && shifted & SIGN32 != 0 {
                    cc |= CC_C;
                }
                self.r[r1] = (rslt >> 16) & DMASK16;
                self.r[r1p1] = rslt & DMASK16;
            }

            /* Arithmetic */
            0x0A | 0x26 | 0x4A | 0xCA => {
                // AHR, AIS, AH, AHI
                let rslt = (self.r[r1] + opnd) & DMASK16;
                cc = cc_gl_16(rslt);
                if rslt < opnd {
                    cc |= CC_C;
                }
                if ((!self.r[r1] ^ opnd) & (self.r[r1] ^ rslt)) & SIGN16 != 0 {
                    cc |= CC_V;
                }
                self.r[r1] = rslt;
            }
            0x61 => {
                // AHM
                let rslt = (self.r[r1] + opnd) & DMASK16;
                cc = cc_gl_16(rslt);
                if rslt < opnd {
                    cc |= CC_C;
                }
                if ((!self.r[r1] ^ opnd) & (self.r[r1] ^ rslt)) & SIGN16 != 0 {
                    cc |= CC_V;
                }
                self.write_h(ea, rslt);
            }
            0x0B | 0x27 | 0x4B | 0xCB => {
                // SHR, SIS, SH, SHI
                let rslt = self.r[r1].wrapping_sub(opnd) & DMASK16;
                cc = cc_gl_16(rslt);
                if self.r[r1] < opnd {
                    cc |= CC_C;
                }
                if ((self.r[r1] ^ opnd) & (!opnd ^ rslt)) & SIGN16 != 0 {
                    cc |= CC_V;
                }
                self.r[r1] = rslt;
            }
            0x09 | 0x49 | 0xC9 => {
                // CHR, CH, CHI
                let sr = sext16(self.r[r1]);
                let st = sext16(opnd);
                cc = if sr < st {
                    CC_C | CC_L
                } else if sr > st {
                    CC_G
                } else {
                    0
                };
                if ((self.r[r1] ^ opnd) & (!opnd ^ sr.wrapping_sub(st) as u32)) & SIGN16 != 0 {
                    cc |= CC_V;
                }
            }
            0x0C | 0x4C => {
                // MHR, MH
                let rslt = (sext16(self.r[r1p1]).wrapping_mul(sext16(opnd))) as u32;
                self.r[r1] = (rslt >> 16) & DMASK16;
                self.r[r1p1] = rslt & DMASK16;
            }
            0x9C | 0xDC => {
                // MHUR, MHU
                let rslt = self.r[r1p1] * opnd;
                self.r[r1] = (rslt >> 16) & DMASK16;
                self.r[r1p1] = rslt & DMASK16;
            }
            0x0D | 0x4D => {
                // DHR, DH
                if opnd == 0 || (self.r[r1] == 0x8000 && self.r[r1p1] == 0 && opnd == 0xFFFF) {
                    if self.psw & PSW_AFI != 0 {
                        cc = self.swap_psw(AFIPSW, cc);
                    }
                } else {
                    let sr = ((self.r[r1] << 16) | self.r[r1p1]) as i32;
                    let st = sr / sext16(opnd);
                    let rem = sr % sext16(opnd);
                    if st < 0x8000 && st >= -0x8000 {
                        self.r[r1] = rem as u32 & DMASK16;
                        self.r[r1p1] = st as u32 & DMASK16;
                    } else if self.psw & PSW_AFI != 0 {
                        cc = self.swap_psw(AFIPSW, cc);
                    }
                }
            }
            0x0E | 0x4E => {
                // ACHR, ACH
                let t = self.r[r1] + opnd + ((cc & CC_C != 0) as u32);
                let rslt = t & DMASK16;
                cc = cc_gl_16(rslt);
                if t > DMASK16 {
                    cc |= CC_C;
                }
                if ((!self.r[r1] ^ opnd) & (self.r[r1] ^ rslt)) & SIGN16 != 0 {
                    cc |= CC_V;
                }
                self.r[r1] = rslt;
            }
            0x0F | 0x4F => {
                // SCHR, SCH
                let t = self.r[r1]
                    .wrapping_sub(opnd)
                    .wrapping_sub((cc & CC_C != 0) as u32);
                let rslt = t & DMASK16;
                cc = cc_gl_16(rslt);
                if t > DMASK16 {
                    cc |= CC_C;
                }
                if ((self.r[r1] ^ opnd) & (!opnd ^ rslt)) & SIGN16 != 0 {
                    cc |= CC_V;
                }
                self.r[r1] = rslt;
            }

            /* Floating point */
            0x28 | 0x38 | 0x68 | 0x78 => {
                // LER, LDR, LE, LD
                let fop2 = self.fp_op2(op, r2, ea, dp);
                cc = self.fp_store(fp::f_load(fop2), r1 as u32, dp);
                cc = self.fp_fault(cc);
            }
            0x29 | 0x39 | 0x69 | 0x79 => {
                // CER, CDR, CE, CD
                let fop2 = self.fp_op2(op, r2, ea, dp);
                let fop1 = self.fp_op1(r1 as u32, dp);
                cc = fp::f_cmp(fop1, fop2, dp);
            }
            0x2A | 0x2B | 0x3A | 0x3B | 0x6A | 0x6B | 0x7A | 0x7B => {
                // AER, SER, ADR, SDR, AE, SE, AD, SD
                let fop2 = self.fp_op2(op, r2, ea, dp);
                let fop1 = self.fp_op1(r1 as u32, dp);
                let guard = dp || self.fp_in_hwre;
                let rnd = !dp && self.fp_in_hwre;
                cc = self.fp_store(fp::f_addsub(fop1, fop2, op & 1 != 0, guard, rnd), r1 as u32, dp);
                cc = self.fp_fault(cc);
            }
            0x2C | 0x3C | 0x6C | 0x7C => {
                // MER, MDR, ME, MD
                let fop2 = self.fp_op2(op, r2, ea, dp);
                let fop1 = self.fp_op1(r1 as u32, dp);
                cc = self.fp_store(fp::f_mul(fop1, fop2, dp), r1 as u32, dp);
                cc = self.fp_fault(cc);
            }
            0x2D | 0x3D | 0x6D | 0x7D => {
                // DER, DDR, DE, DD
                let fop2 = self.fp_op2(op, r2, ea, dp);
                let fop1 = self.fp_op1(r1 as u32, dp);
                cc = match fp::f_div(fop1, fop2, dp) {
                    Some(p) => self.fp_store(p, r1 as u32, dp),
                    None => CC_C | CC_V,
                };
                if cc & CC_V != 0
                    && (cc & CC_C != 0 || (self.psw & PSW_FPF != 0 && self.cpu_x16()))
                {
                    cc = self.swap_psw(FPFPSW, cc);
                }
            }
            0x2E | 0x3E => {
                // FXR, FXDR
                let res = self.fp_op1(r2, dp);
                let (val, new_cc) = fp::f_fix16(res);
                self.r[r1] = val;
                cc = new_cc;
            }
            0x2F | 0x3F => {
                // FLR, FLDR
                let (packed, new_cc) = fp::f_flt16(self.r[r2 as usize]);
                self.fp_store(packed, r1 as u32, dp);
                cc = new_cc;
            }
            0x60 => {
                // STE
                let t = self.read_freg(r1 as u32);
                self.write_f(ea, t, false);
            }
            0x70 => {
                // STD
                let (h, l) = self.dregs[r1 >> 1];
                self.write_f(ea, h, false);
                self.write_f((ea + 4) & VAMASK, l, false);
            }
            0x71 => {
                // STME
                let mut ea = ea;
                let mut r = r1 as u32;
                while r <= 0xE {
                    let t = self.read_freg(r);
                    self.write_f(ea, t, false);
                    ea = (ea + 4) & VAMASK;
                    r += 2;
                }
            }
            0x72 => {
                // LME
                let mut ea = ea;
                let mut r = r1 as u32;
                while r <= 0xE {
                    let t = self.read_f(ea, false);
                    self.write_freg(r, t);
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
                    self.write_f(ea, h, false);
                    self.write_f((ea + 4) & VAMASK, l, false);
                    ea = (ea + 8) & VAMASK;
                    r += 2;
                }
            }
            0x7F => {
                // LMD
                let mut ea = ea;
                let mut r = r1;
                while r <= 0xE {
                    let h = self.read_f(ea, false);
                    let l = self.read_f((ea + 4) & VAMASK, false);
                    self.dregs[r >> 1] = (h, l);
                    ea = (ea + 8) & VAMASK;
                    r += 2;
                }
            }

            /* Miscellaneous */
            0xE1 => {
                // SVC: save parameter/PSW/PC, vector through the service
                // table slot selected by R1
                self.pcq_entry(o_pc);
                self.write_h(SVCAP, ea);
                self.write_h(SVOPS, self.build_psw(cc));
                self.write_h(SVOPC, self.pc);
                self.pc = self.read_h(SVNPC + 2 * r1 as u32);
                cc = self.new_psw(self.read_h(SVNPS));
                debug!(pc = self.pc, "svc");
            }
            0xE2 => {
                // SINT: simulate an auto-driven interrupt
                let dev = opnd & DEV_MAX;
                cc = self.int_auto(dev, cc);
                self.int_eval();
            }
            0xC2 => {
                // LPSW
                self.pcq_entry(o_pc);
                self.pc = self.read_h((ea + 2) & VAMASK);
                cc = self.new_psw(self.read_h(ea));
                if self.psw & PSW_SQI != 0 {
                    cc = self.test_sysq(cc);
                }
            }
            0x95 => {
                // EPSR
                self.r[r1] = self.build_psw(cc);
                cc = self.new_psw(self.r[r2 as usize]);
                if self.psw & PSW_SQI != 0 {
                    cc = self.test_sysq(cc);
                }
            }
            0x33 => {
                // LPSR
                cc = self.new_psw(self.r[r2 as usize]);
                if self.psw & PSW_SQI != 0 {
                    cc = self.test_sysq(cc);
                }
            }
            0x73 => {
                // LPS
                cc = self.new_psw(opnd);
                if self.psw & PSW_SQI != 0 {
                    cc = self.test_sysq(cc);
                }
            }
            0x64 | 0x65 => cc = self.add_to_queue(ea, self.r[r1], op & 1 != 0), // ATL, ABL
            0x66 | 0x67 => cc = self.rem_from_queue(ea, r1 as u32, op & 1 != 0), // RTL, RBL
            0x13 | 0x53 => {
                // SETMR, SETM: load the memory map, steering by the sign
                // of R1
                let t = self.build_psw(cc);
                let mut map = psw_get_map(opnd);
                match map {
                    0x7 => {
                        map = 0;
                        self.r[r1] ^= SIGN16;
                    }
                    0x8..=0xE => {
                        if self.r[r1] & SIGN16 != 0 {
                            map &= !0x8;
                        } else {
                            map = 0;
                            self.r[r1] |= SIGN16;
                        }
                    }
                    _ => {}
                }
                let t = (t & !PSW_MAP) | (map << PSW_V_MAP);
                self.new_psw(t);
                cc = cc_gl_16(self.r[r1]);
            }

            /* I/O */
            0xDE | 0x9E => {
                // OC, OCR
                let cmd = if op == 0xDE { self.read_b(ea) } else { opnd };
                let dev = self.r[r1] & DEV_MAX;
                if self.fab.dev_acc(dev) {
                    self.fab.dev_io(dev, IoOp::Adr, 0);
                    self.fab.dev_io(dev, IoOp::Oc, cmd & DMASK8);
                    self.int_eval();
                    cc = 0;
                } else {
                    cc = CC_V;
                }
            }
            0xDA | 0x9A => {
                // WD, WDR
                let dat = if op == 0xDA { self.read_b(ea) } else { opnd };
                let dev = self.r[r1] & DEV_MAX;
                if self.fab.dev_acc(dev) {
                    self.fab.dev_io(dev, IoOp::Adr, 0);
                    self.fab.dev_io(dev, IoOp::Wd, dat & DMASK8);
                    self.int_eval();
                    cc = 0;
                } else {
                    cc = CC_V;
                }
            }
            0xD8 | 0x98 => {
                // WH, WHR
                let dat = if op == 0xD8 { self.read_h(ea) } else { opnd };
                let dev = self.r[r1] & DEV_MAX;
                if self.fab.dev_acc(dev) {
                    if self.fab.dev_io(dev, IoOp::Adr, 0) != 0 {
                        self.fab.dev_io(dev, IoOp::Wh, dat);
                    } else {
                        // byte device: two byte writes, high first
                        self.fab.dev_io(dev, IoOp::Wd, dat >> 8);
                        self.fab.dev_io(dev, IoOp::Wd, dat & DMASK8);
                    }
                    self.int_eval();
                    cc = 0;
                } else {
                    cc = CC_V;
                }
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
                    self.write_b(ea, t);
                } else {
                    self.r[r2 as usize] = t & DMASK8;
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
                    self.write_h(ea, t);
                } else {
                    self.r[r2 as usize] = t;
                }
                self.int_eval();
            }
            0x9F | 0xDF | 0x9D | 0xDD => {
                // AIR, AI (acknowledge), SSR, SS
                if op == 0x9F || op == 0xDF {
                    self.r[r1] = self.fab.ints.getdev();
                }
                let dev = self.r[r1] & DEV_MAX;
                let t = if self.fab.dev_acc(dev) {
                    self.fab.dev_io(dev, IoOp::Adr, 0);
                    self.fab.dev_io(dev, IoOp::Ss, 0)
                } else {
                    STA_EX
                };
                if op_type(&DECROM, op) != OP_RR {
                    self.write_b(ea, t);
                } else {
                    self.r[r2 as usize] = t & DMASK8;
                }
                cc = t & 0xF;
                self.int_eval();
            }

            /* Block I/O: set up the status block and let the main loop
               drain it one byte per iteration */
            0x96 | 0xD6 => {
                // WBR, WB
                let dev = self.r[r1] & DEV_MAX;
                if self.fab.dev_acc(dev) {
                    let lim = if op_type(&DECROM, op) != OP_RR {
                        self.read_h((ea + 2) & VAMASK)
                    } else {
                        self.r[(r2 as usize + 1) & 0xF]
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
                        self.read_h((ea + 2) & VAMASK)
                    } else {
                        self.r[(r2 as usize + 1) & 0xF]
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
                // AL: autoload through the block-I/O machinery, with
                // leading zeros suppressed
                let dev = self.read_b(AL_DEV);
                let t = self.read_b(AL_IOC);
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
        Ok(cc)
    }
}
