//! 88-2SIO serial board.
//!
//! Two status/data port pairs: the first carries the console terminal,
//! the second is wired to the paper tape reader and punch. Status bit 0
//! is receive-data-ready, bit 1 transmit-ready. Writing 0x03 to a status
//! port resets it. The console keyboard is filled by the machine's poll
//! unit; the front end queues input bytes and drains output.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct Sio {
    /// Console status (u3 in the original)
    stat: u8,
    buf: u8,
    input: VecDeque<u8>,
    output: Vec<u8>,
    /// Paper tape reader image and position; exhausted flag latches
    tape: Option<Vec<u8>>,
    tpos: usize,
    teof: bool,
    punch: Option<Vec<u8>>,
}

impl Sio {
    pub fn new() -> Self {
        Self {
            stat: 0x02,
            buf: 0,
            input: VecDeque::new(),
            output: Vec::new(),
            tape: None,
            tpos: 0,
            teof: false,
            punch: None,
        }
    }

    pub fn reset(&mut self) {
        self.stat = 0x02;
        self.buf = 0;
    }

    /// Embedder: queue console input
    pub fn queue_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    /// Embedder: drain console output
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub fn attach_reader(&mut self, tape: Vec<u8>) {
        self.tape = Some(tape);
        self.tpos = 0;
        self.teof = false;
    }

    pub fn attach_punch(&mut self) {
        self.punch = Some(Vec::new());
    }

    pub fn detach_punch(&mut self) -> Option<Vec<u8>> {
        self.punch.take()
    }

    /// Keyboard poll: move one queued byte into the receive buffer
    pub fn poll_kbd(&mut self) {
        if self.stat & 0x01 == 0 {
            if let Some(b) = self.input.pop_front() {
                self.buf = b;
                self.stat |= 0x01;
            }
        }
    }

    /// Port 0x10: console status
    pub fn s0_status(&mut self, write: bool, data: u8) -> u8 {
        if write {
            if data == 0x03 {
                self.stat = 0x02;
                self.buf = 0;
            }
            0
        } else {
            self.stat
        }
    }

    /// Port 0x11: console data
    pub fn s0_data(&mut self, write: bool, data: u8) -> u8 {
        if write {
            self.output.push(data);
            0
        } else {
            self.stat &= !0x01;
            self.buf
        }
    }

    /// Port 0x12: tape status
    pub fn s1_status(&mut self, write: bool, data: u8) -> u8 {
        if write {
            if data == 0x03 {
                self.tpos = 0;
                self.teof = false;
            }
            0
        } else if self.tape.is_none() || self.teof {
            0x02
        } else {
            0x03
        }
    }

    /// Port 0x13: tape data
    pub fn s1_data(&mut self, write: bool, data: u8) -> u8 {
        if write {
            if let Some(p) = &mut self.punch {
                p.push(data);
            }
            0
        } else {
            let Some(tape) = &self.tape else {
                return 0;
            };
            if self.teof {
                return 0;
            }
            match tape.get(self.tpos) {
                Some(&b) => {
                    self.tpos += 1;
                    b
                }
                None => {
                    self.teof = true;
                    0
                }
            }
        }
    }
}

impl Default for Sio {
    fn default() -> Self {
        Self::new()
    }
}
