/*
 * Test utilities for Zephyrfan
 *
 * A scripted fake EC that speaks the real four-phase indexed protocol, so
 * stabilizer tests exercise the genuine transport path end to end.
 */

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::config::{FanRegisters, Settings};
use crate::ec::{EcTransport, PortIo};

#[derive(Default)]
struct EcState {
    regs: HashMap<u16, u8>,
    /// EC-register writes in order, decoded from the wire protocol.
    writes: Vec<(u16, u8)>,
    slots: Vec<u8>,
    last_cmd: Option<u8>,
    addr_hi: u8,
    addr_lo: u8,
}

impl EcState {
    fn addr(&self) -> u16 {
        (u16::from(self.addr_hi) << 8) | u16::from(self.addr_lo)
    }
}

/// Handle to a simulated EC. Create once, hand transports out via
/// [`FakeEc::transport`], keep the handle for seeding and assertions.
pub struct FakeEc {
    state: Rc<RefCell<EcState>>,
    addr_port: u8,
    data_port: u8,
}

struct FakeEcPort {
    state: Rc<RefCell<EcState>>,
    addr_port: u8,
    data_port: u8,
}

impl PortIo for FakeEcPort {
    fn select_slot(&mut self, slot: u8) {
        self.state.borrow_mut().slots.push(slot);
    }

    fn write_port(&mut self, port: u8, value: u8) {
        let mut st = self.state.borrow_mut();
        if port == self.addr_port {
            st.last_cmd = Some(value);
        } else if port == self.data_port {
            match st.last_cmd {
                Some(0x11) => st.addr_hi = value,
                Some(0x10) => st.addr_lo = value,
                Some(0x12) => {
                    let addr = st.addr();
                    st.regs.insert(addr, value);
                    st.writes.push((addr, value));
                }
                _ => {}
            }
        }
    }

    fn read_port(&mut self, port: u8) -> u8 {
        let st = self.state.borrow();
        if port == self.data_port && st.last_cmd == Some(0x12) {
            *st.regs.get(&st.addr()).unwrap_or(&0)
        } else {
            0
        }
    }
}

impl FakeEc {
    /// Fake EC reachable on the default 0x2E/0x2F port pair.
    pub fn new() -> Self {
        FakeEc {
            state: Rc::new(RefCell::new(EcState::default())),
            addr_port: 0x2E,
            data_port: 0x2F,
        }
    }

    /// A transport wired to this fake.
    pub fn transport(&self) -> EcTransport {
        EcTransport::new(Box::new(FakeEcPort {
            state: Rc::clone(&self.state),
            addr_port: self.addr_port,
            data_port: self.data_port,
        }))
    }

    pub fn set_reg(&self, addr: u16, value: u8) {
        self.state.borrow_mut().regs.insert(addr, value);
    }

    pub fn reg(&self, addr: u16) -> u8 {
        *self.state.borrow().regs.get(&addr).unwrap_or(&0)
    }

    /// EC-register writes seen so far, in order.
    pub fn writes(&self) -> Vec<(u16, u8)> {
        self.state.borrow().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.borrow_mut().writes.clear();
    }

    pub fn slot_selections(&self) -> Vec<u8> {
        self.state.borrow().slots.clone()
    }

    /// Seed a raw tachometer count for one fan.
    pub fn set_tach(&self, regs: &FanRegisters, count: u16) {
        self.set_reg(regs.tach_low, (count & 0xFF) as u8);
        self.set_reg(regs.tach_high, (count >> 8) as u8);
    }

    /// Seed the tachometer so the fan reads approximately `rpm`
    /// (exact to within integer-division rounding; 0 means stalled).
    pub fn set_rpm(&self, regs: &FanRegisters, rpm: u32) {
        let count = if rpm == 0 {
            0
        } else {
            (2_156_250 / rpm).min(0xFFFE) as u16
        };
        self.set_tach(regs, count);
    }

    /// Seed the BIOS-requested target RPM for one fan.
    pub fn set_target(&self, regs: &FanRegisters, rpm: u16) {
        self.set_reg(regs.target_high, (rpm >> 8) as u8);
        self.set_reg(regs.target_low, (rpm & 0xFF) as u8);
    }

    pub fn set_temps(&self, cfg: &Settings, cpu: u8, gpu: u8, sys: u8) {
        self.set_reg(cfg.cpu_temp_reg, cpu);
        self.set_reg(cfg.gpu_temp_reg, gpu);
        self.set_reg(cfg.sys_temp_reg, sys);
    }

    pub fn set_mode(&self, cfg: &Settings, mode: u8) {
        self.set_reg(cfg.mode_reg, mode);
    }
}

#[cfg(test)]
mod tests {
    use super::FakeEc;
    use crate::config::Settings;

    #[test]
    fn test_fake_ec_roundtrip_through_transport() {
        let ec = FakeEc::new();
        let mut tr = ec.transport();
        ec.set_reg(0x1806, 0x42);
        assert_eq!(tr.ec_read(0x2E, 0x2F, 0x1806), 0x42);
        assert_eq!(tr.ec_read(0x2E, 0x2F, 0x9999), 0);

        tr.ec_write(0x2E, 0x2F, 0x0484, 8);
        assert_eq!(ec.reg(0x0484), 8);
        assert_eq!(ec.writes(), vec![(0x0484, 8)]);
    }

    #[test]
    fn test_fake_ec_records_slot_selection_once() {
        let ec = FakeEc::new();
        let mut tr = ec.transport();
        tr.ec_read(0x2E, 0x2F, 0x0306);
        tr.ec_read(0x2E, 0x2F, 0x0358);
        assert_eq!(ec.slot_selections(), vec![0]);
    }

    #[test]
    fn test_fake_ec_tach_helpers() {
        let ec = FakeEc::new();
        let mut tr = ec.transport();
        let cfg = Settings::default();
        ec.set_tach(&cfg.cpu_fan, 0x1234);
        assert_eq!(tr.ec_read(0x2E, 0x2F, cfg.cpu_fan.tach_low), 0x34);
        assert_eq!(tr.ec_read(0x2E, 0x2F, cfg.cpu_fan.tach_high), 0x12);
    }
}
