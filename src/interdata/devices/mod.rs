//! Interdata peripheral models.
//!
//! Each device is a state machine with two faces: an `io` method serving
//! the programmed-I/O dispatch contract (address-select, read, write,
//! output-command, sense-status), and one or more unit service routines
//! fired by the event scheduler. Devices talk back to the fabric (raise
//! interrupts, re-arm their units, pump the selector channel) through the
//! context handed to them.

pub mod clocks;
pub mod console;
pub mod dp;
pub mod fd;
pub mod idc;
pub mod lpt;
pub mod mt;
pub mod pas;
pub mod pt;
pub mod storage;

use super::defs::*;
use super::io::{Dib, DevId, IntCtl};
use super::mem::IdMemory;
use super::selch::SelCh;
use crate::sched::EventQueue;

/// Scheduled unit identity. Units carry only their own ordinal; the
/// device tables map them back to their owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitId {
    /// Console keyboard
    Tti,
    /// Console printer
    Tto,
    /// Line frequency clock tick
    Lfc,
    /// Precision clock
    Pic,
    /// Line printer
    Lpt,
    /// Paper tape reader
    Ptr,
    /// Paper tape punch
    Ptp,
    /// Async line receive side
    PasRcv(u8),
    /// Async line transmit side
    PasXmt(u8),
    /// Magtape drive
    Mt(u8),
    /// Cartridge disk drive
    Dp(u8),
    /// MSM disk drive
    Idc(u8),
    /// Floppy disk
    Fd,
}

/// Fabric context for programmed-I/O calls
pub struct IoCtx<'a> {
    pub ints: &'a mut IntCtl,
    pub sched: &'a mut EventQueue<UnitId>,
    pub selch: &'a mut SelCh,
}

/// Fabric context for unit service routines (adds memory for DMA)
pub struct SvcCtx<'a> {
    pub ints: &'a mut IntCtl,
    pub sched: &'a mut EventQueue<UnitId>,
    pub selch: &'a mut SelCh,
    pub mem: &'a mut IdMemory,
}

/// The full peripheral complement of an Interdata system
#[derive(Debug)]
pub struct DevSet {
    pub tt: console::Console,
    pub lfc: clocks::Lfc,
    pub pic: clocks::Pic,
    pub lpt: lpt::Lpt,
    pub pt: pt::PaperTape,
    pub pas: pas::Pas,
    pub mt: mt::Magtape,
    pub dp: dp::DpDisk,
    pub idc: idc::IdcDisk,
    pub fd: fd::Floppy,
}

impl DevSet {
    pub fn new() -> Self {
        Self {
            tt: console::Console::new(),
            lfc: clocks::Lfc::new(),
            pic: clocks::Pic::new(),
            lpt: lpt::Lpt::new(),
            pt: pt::PaperTape::new(),
            pas: pas::Pas::new(),
            mt: mt::Magtape::new(),
            dp: dp::DpDisk::new(),
            idc: idc::IdcDisk::new(),
            fd: fd::Floppy::new(),
        }
    }

    /// Device information blocks for every enabled device, templates
    /// expanded for the multi-number controllers
    pub fn dibs(&self, num_selch: usize) -> Vec<Dib> {
        let mut dibs = vec![
            Dib {
                dno: D_SCH,
                sch: None,
                irq: V_SCH,
                tplte: (0..num_selch as u8).collect(),
                id: DevId::SelCh,
            },
            Dib {
                dno: self.tt.dno,
                sch: None,
                irq: V_TT,
                tplte: vec![],
                id: DevId::Tt,
            },
            Dib {
                dno: self.pt.dno,
                sch: None,
                irq: V_PT,
                tplte: vec![],
                id: DevId::Pt,
            },
            Dib {
                dno: self.lpt.dno,
                sch: None,
                irq: V_LPT,
                tplte: vec![],
                id: DevId::Lpt,
            },
            Dib {
                dno: self.pic.dno,
                sch: None,
                irq: V_PIC,
                tplte: vec![],
                id: DevId::Pic,
            },
            Dib {
                dno: self.lfc.dno,
                sch: None,
                irq: V_LFC,
                tplte: vec![],
                id: DevId::Lfc,
            },
            Dib {
                dno: self.mt.dno,
                sch: Some(self.mt.sch),
                irq: V_MT,
                tplte: (0..MT_NUMDR as u8).map(|u| u * O_MT0 as u8).collect(),
                id: DevId::Mt,
            },
            Dib {
                dno: self.dp.dno,
                sch: Some(self.dp.sch),
                irq: V_DPC,
                tplte: (0..=DP_NUMDR as u8).map(|u| u * O_DP0 as u8).collect(),
                id: DevId::Dp,
            },
            Dib {
                dno: self.idc.dno,
                sch: Some(self.idc.sch),
                irq: V_IDC,
                tplte: (0..=ID_NUMDR as u8).collect(),
                id: DevId::Idc,
            },
            Dib {
                dno: self.fd.dno,
                sch: None,
                irq: V_FD,
                tplte: vec![],
                id: DevId::Fd,
            },
        ];
        if self.pas.lines > 0 {
            dibs.push(Dib {
                dno: self.pas.dno,
                sch: None,
                irq: V_PAS,
                tplte: (0..(self.pas.lines * 2) as u8).collect(),
                id: DevId::Pas,
            });
        }
        dibs
    }

    /// Power-on reset of every device
    pub fn reset_all(&mut self, cx: &mut IoCtx) {
        self.tt.reset(cx);
        self.lfc.reset(cx);
        self.pic.reset(cx);
        self.lpt.reset(cx);
        self.pt.reset(cx);
        self.pas.reset(cx);
        self.mt.reset(cx);
        self.dp.reset(cx);
        self.idc.reset(cx);
        self.fd.reset(cx);
    }
}

impl Default for DevSet {
    fn default() -> Self {
        Self::new()
    }
}
