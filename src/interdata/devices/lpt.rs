//! Line printer.
//!
//! Characters accumulate in a 132-column buffer; control characters in
//! 0x0A..0x0D and the spacing range 0x40..0x77 print the buffered line and
//! move the paper. The BUSY handshake runs through the unit service, which
//! interrupts when armed.

use super::{IoCtx, SvcCtx, UnitId};
use crate::interdata::defs::*;
use crate::StopReason;

pub const LPT_WIDTH: usize = 132;

const SPC_BASE: u32 = 0x40; /* spacing commands */
const SPC_END: u32 = 0x78;
const LF: u32 = 0xA;
const CR: u32 = 0xD;

const STA_PAPE: u32 = 0x40; /* paper empty */
const STA_MASK: u32 = STA_BSY;

const CHAR_WAIT: u64 = 10;
const SPACE_WAIT: u64 = 1000;

#[derive(Debug)]
pub struct Lpt {
    pub dno: u32,
    sta: u32,
    buf: u32,
    line: Vec<u8>,
    /// Space pending after a CR
    spnd: bool,
    arm: bool,
    pub stop_ioe: bool,
    attached: bool,
    output: Vec<u8>,
}

impl Lpt {
    pub fn new() -> Self {
        Self {
            dno: D_LPT,
            sta: STA_BSY,
            buf: 0,
            line: Vec::new(),
            spnd: false,
            arm: false,
            stop_ioe: false,
            attached: false,
            output: Vec::new(),
        }
    }

    /// Embedder: load paper
    pub fn attach(&mut self) {
        self.attached = true;
        self.output.clear();
    }

    pub fn detach(&mut self) -> Vec<u8> {
        self.attached = false;
        std::mem::take(&mut self.output)
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn io(&mut self, _dev: u32, op: IoOp, dat: u32, cx: &mut IoCtx) -> u32 {
        match op {
            IoOp::Adr => BY,

            IoOp::Oc => {
                self.arm = cx.ints.int_chg(V_LPT, dat, self.arm);
                0
            }

            IoOp::Wd => {
                self.buf = dat & 0x7F;
                self.sta = STA_BSY;
                let wait = if self.spnd || (self.buf >= LF && self.buf <= CR) {
                    SPACE_WAIT
                } else {
                    CHAR_WAIT
                };
                cx.sched.activate(UnitId::Lpt, wait);
                0
            }

            IoOp::Ss => {
                let mut t = self.sta & STA_MASK;
                if !self.attached {
                    t |= STA_EX | STA_PAPE | STA_BSY;
                }
                t
            }

            _ => 0,
        }
    }

    pub fn svc(&mut self, cx: &mut SvcCtx) -> Result<(), StopReason> {
        self.sta = 0;
        if self.arm {
            cx.ints.set_int(V_LPT);
        }
        if !self.attached {
            return if self.stop_ioe {
                Err(StopReason::IoError)
            } else {
                Ok(())
            };
        }
        let t = self.buf;
        if self.spnd || (t >= LF && t < CR) {
            self.spnd = false;
            self.flush_line();
            let lines = match t {
                1 | LF => 1,
                _ if (SPC_BASE..SPC_END).contains(&t) => t - SPC_BASE,
                _ => 1,
            };
            for _ in 0..lines {
                self.output.push(b'\n');
            }
        } else if t == CR {
            self.spnd = true;
            self.flush_line();
        } else if t >= 0x20 {
            if self.line.len() < LPT_WIDTH {
                self.line.push(t as u8);
            }
        }
        Ok(())
    }

    fn flush_line(&mut self) {
        while self.line.last() == Some(&b' ') {
            self.line.pop();
        }
        self.output.extend_from_slice(&self.line);
        self.line.clear();
    }

    pub fn reset(&mut self, cx: &mut IoCtx) {
        cx.sched.cancel(UnitId::Lpt);
        self.sta = STA_BSY;
        self.buf = 0;
        self.line.clear();
        self.spnd = false;
        cx.ints.clr_int(V_LPT);
        cx.ints.clr_enb(V_LPT);
        self.arm = false;
    }
}

impl Default for Lpt {
    fn default() -> Self {
        Self::new()
    }
}
