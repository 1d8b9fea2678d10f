//! Programmable async line adapter.
//!
//! Up to 32 serial lines, each taking a pair of device numbers: the even
//! number is the receive side, the odd the transmit side, with separate
//! interrupt vectors in words 2-3 of the interrupt array. The multiplexor
//! front end is out of scope; only the byte contract lives here, with the
//! embedder queuing input per line and draining each line's output. The
//! receive poll for every line rides on a single co-scheduled tick.

use std::collections::VecDeque;

use super::{IoCtx, SvcCtx, UnitId};
use crate::interdata::defs::*;
use crate::StopReason;

pub const STA_OVR: u32 = 0x80; /* overrun */
pub const STA_PF: u32 = 0x40; /* parity error (rcv) */
pub const STA_FR: u32 = 0x20; /* framing error */
pub const STA_CROF: u32 = 0x02; /* carrier off */
pub const STA_RING: u32 = 0x01;
const STA_RCV: u32 = STA_OVR | STA_PF | STA_FR | STA_CROF | STA_RING;
const SET_EX: u32 = STA_OVR | STA_PF | STA_FR;
const STA_XMT: u32 = STA_BSY;

/// Command byte 1 (type bit set)
const CMD_DTR: u32 = 0x20 << 8;
const CMD_ECHO: u32 = 0x10 << 8;
const CMD_WRT: u32 = 0x02 << 8;
const CMD_TYP: u32 = 0x01;

const POLL_WAIT: u64 = 500;
const XMT_WAIT: u64 = 100;

#[derive(Debug, Default)]
struct Line {
    sta: u32,
    cmd: u32,
    rbuf: u32,
    xbuf: u32,
    rarm: bool,
    xarm: bool,
    rchp: bool,
    connected: bool,
    input: VecDeque<u8>,
    break_pending: bool,
    output: Vec<u8>,
}

#[derive(Debug)]
pub struct Pas {
    pub dno: u32,
    pub lines: usize,
    ln: Vec<Line>,
}

impl Pas {
    pub fn new() -> Self {
        let lines = 8;
        Self {
            dno: D_PAS,
            lines,
            ln: (0..lines).map(|_| Line::default()).collect(),
        }
    }

    /// Embedder: mark a line connected (carrier up)
    pub fn connect(&mut self, ln: usize) {
        let l = &mut self.ln[ln];
        l.connected = true;
        l.sta &= !STA_CROF;
    }

    pub fn disconnect(&mut self, ln: usize) {
        let l = &mut self.ln[ln];
        l.connected = false;
        l.sta |= STA_CROF;
    }

    pub fn queue_input(&mut self, ln: usize, bytes: &[u8]) {
        self.ln[ln].input.extend(bytes);
    }

    pub fn queue_break(&mut self, ln: usize) {
        self.ln[ln].break_pending = true;
    }

    pub fn take_output(&mut self, ln: usize) -> Vec<u8> {
        std::mem::take(&mut self.ln[ln].output)
    }

    fn line_of(&self, dev: u32) -> usize {
        (((dev - self.dno) / 2) as usize).min(self.lines - 1)
    }

    pub fn io(&mut self, dev: u32, op: IoOp, dat: u32, cx: &mut IoCtx) -> u32 {
        let xmt = (dev - self.dno) & O_PASX != 0;
        let lnno = self.line_of(dev);
        let vec = V_PAS + 2 * lnno as u32;
        let l = &mut self.ln[lnno];
        match op {
            IoOp::Adr => BY,

            IoOp::Rd => {
                l.rchp = false;
                l.sta &= !STA_OVR;
                l.rbuf & 0xFF
            }

            IoOp::Wd => {
                l.xbuf = dat & DMASK8;
                l.sta |= STA_BSY;
                cx.sched.activate(UnitId::PasXmt(lnno as u8), XMT_WAIT);
                0
            }

            IoOp::Ss => {
                let mut t;
                if xmt {
                    t = l.sta & STA_XMT;
                } else {
                    t = l.sta & STA_RCV;
                    if !l.rchp {
                        t |= STA_BSY;
                    }
                    if !l.connected {
                        t |= STA_BSY | STA_EX;
                    } else if t & SET_EX != 0 {
                        t |= STA_EX;
                    }
                }
                t &= 0xFF;
                t
            }

            IoOp::Oc => {
                if dat & CMD_TYP != 0 {
                    // type 1: mode byte
                    let old_cmd = l.cmd;
                    l.cmd = (l.cmd & 0xFF) | (dat << 8);
                    if l.cmd & CMD_DTR != 0 && l.sta & STA_RING != 0 {
                        l.sta &= !(STA_CROF | STA_RING);
                    }
                    if old_cmd & !l.cmd & CMD_DTR != 0 {
                        // dropping DTR hangs the line up
                        l.connected = false;
                        l.sta |= STA_CROF;
                    }
                } else if xmt {
                    l.xarm = cx.ints.int_chg(vec + 1, dat, l.xarm);
                } else {
                    l.rarm = cx.ints.int_chg(vec, dat, l.rarm);
                }
                0
            }

            IoOp::Rh | IoOp::Wh => 0,
        }
    }

    /// Receive poll: one service covers one line, re-armed on the tick
    pub fn svc_rcv(&mut self, lnno: usize, cx: &mut SvcCtx) -> Result<(), StopReason> {
        let next = cx.sched.cosched(UnitId::Lfc, POLL_WAIT);
        cx.sched.activate(UnitId::PasRcv(lnno as u8), next);
        let vec = V_PAS + 2 * lnno as u32;
        let l = &mut self.ln[lnno];
        if !l.connected {
            return Ok(());
        }
        let brk = std::mem::take(&mut l.break_pending);
        if !brk && l.input.is_empty() {
            return Ok(());
        }
        if l.rchp {
            l.sta |= STA_OVR;
        }
        l.sta &= !(STA_FR | STA_PF);
        if brk {
            l.sta |= STA_FR;
            l.rbuf = 0;
        } else {
            l.rbuf = l.input.pop_front().unwrap() as u32;
            if l.cmd & CMD_ECHO != 0 {
                l.output.push(l.rbuf as u8);
            }
        }
        l.rchp = true;
        if l.rarm {
            cx.ints.set_int(vec);
        }
        Ok(())
    }

    /// Transmit complete: emit the byte, drop BUSY, interrupt if armed
    pub fn svc_xmt(&mut self, lnno: usize, cx: &mut SvcCtx) -> Result<(), StopReason> {
        let vec = V_PAS + 2 * lnno as u32 + 1;
        let l = &mut self.ln[lnno];
        if l.connected && l.cmd & CMD_WRT != 0 {
            l.output.push(l.xbuf as u8);
        }
        l.sta &= !STA_BSY;
        if l.xarm {
            cx.ints.set_int(vec);
        }
        Ok(())
    }

    pub fn reset(&mut self, cx: &mut IoCtx) {
        for i in 0..self.lines {
            let vec = V_PAS + 2 * i as u32;
            cx.ints.clr_int(vec);
            cx.ints.clr_enb(vec);
            cx.ints.clr_int(vec + 1);
            cx.ints.clr_enb(vec + 1);
            cx.sched.cancel(UnitId::PasXmt(i as u8));
            let next = cx.sched.cosched(UnitId::Lfc, POLL_WAIT);
            cx.sched.activate(UnitId::PasRcv(i as u8), next);
            let l = &mut self.ln[i];
            l.sta = if l.connected { 0 } else { STA_CROF };
            l.cmd = 0;
            l.rarm = false;
            l.xarm = false;
            l.rchp = false;
        }
    }
}

impl Default for Pas {
    fn default() -> Self {
        Self::new()
    }
}
