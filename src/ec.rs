/*
 * This file is part of Zephyrfan.
 *
 * Copyright (C) 2026 Zephyrfan contributors
 *
 * Zephyrfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Zephyrfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Zephyrfan. If not, see <https://www.gnu.org/licenses/>.
 */

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to open /dev/port: {0}")]
    Open(#[from] std::io::Error),
}

/// Raw byte-wide port I/O channel.
///
/// Failure contract: implementations never surface I/O errors. A failed read
/// yields 0 and a failed write is dropped, so the caller cannot distinguish
/// "EC reports 0" from "read failed". The polling loop is self-correcting on
/// the next tick, which is the compatibility behavior this crate preserves.
#[cfg_attr(test, mockall::automock)]
pub trait PortIo {
    /// Point the channel at one of the bridged I/O slots. Backends that
    /// address ports directly may ignore this.
    fn select_slot(&mut self, slot: u8);
    fn read_port(&mut self, port: u8) -> u8;
    fn write_port(&mut self, port: u8, value: u8);
}

/// Port I/O through `/dev/port`, where the file offset is the port number.
/// Requires root.
pub struct DevPortIo {
    file: File,
}

impl DevPortIo {
    pub fn open() -> Result<Self, ChannelError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/port")?;
        Ok(DevPortIo { file })
    }
}

impl PortIo for DevPortIo {
    fn select_slot(&mut self, _slot: u8) {
        // /dev/port addresses the full port space; no slot bridging needed.
    }

    fn read_port(&mut self, port: u8) -> u8 {
        let mut buf = [0u8; 1];
        match self.file.read_at(&mut buf, u64::from(port)) {
            Ok(1) => buf[0],
            _ => 0,
        }
    }

    fn write_port(&mut self, port: u8, value: u8) {
        let _ = self.file.write_at(&[value], u64::from(port));
    }
}

/// Inert channel used when the real one cannot be opened: every read is 0,
/// every write a no-op. Keeps the service polling instead of dying.
pub struct NullPortIo;

impl PortIo for NullPortIo {
    fn select_slot(&mut self, _slot: u8) {}
    fn read_port(&mut self, _port: u8) -> u8 {
        0
    }
    fn write_port(&mut self, _port: u8, _value: u8) {}
}

/// Index-port commands of the four-phase EC access sequence.
const CMD_ADDR_HIGH: u8 = 0x11;
const CMD_ADDR_LOW: u8 = 0x10;
const CMD_DATA: u8 = 0x12;

/// EC register transport over two 8-bit ports.
///
/// Owns the channel's one piece of session state: the currently selected I/O
/// slot. Ports 0x2E/0x2F live in slot 0 and 0x4E/0x4F in slot 1; any other
/// port leaves the selection alone. Re-selection is memoized so back-to-back
/// operations on the same pair cost no extra channel calls.
pub struct EcTransport {
    io: Box<dyn PortIo>,
    slot: Option<u8>,
}

fn slot_for_port(port: u8) -> Option<u8> {
    match port {
        0x2E | 0x2F => Some(0),
        0x4E | 0x4F => Some(1),
        _ => None,
    }
}

impl EcTransport {
    pub fn new(io: Box<dyn PortIo>) -> Self {
        EcTransport { io, slot: None }
    }

    fn ensure_slot(&mut self, port: u8) {
        if let Some(slot) = slot_for_port(port) {
            if self.slot != Some(slot) {
                self.io.select_slot(slot);
                self.slot = Some(slot);
            }
        }
    }

    fn write_raw(&mut self, port: u8, value: u8) {
        self.ensure_slot(port);
        self.io.write_port(port, value);
    }

    fn read_raw(&mut self, port: u8) -> u8 {
        self.ensure_slot(port);
        self.io.read_port(port)
    }

    fn select_address(&mut self, addr_port: u8, data_port: u8, addr: u16) {
        self.write_raw(addr_port, CMD_ADDR_HIGH);
        self.write_raw(data_port, (addr >> 8) as u8);
        self.write_raw(addr_port, CMD_ADDR_LOW);
        self.write_raw(data_port, (addr & 0xFF) as u8);
        self.write_raw(addr_port, CMD_DATA);
    }

    /// Read one byte from a 16-bit-addressed EC register.
    pub fn ec_read(&mut self, addr_port: u8, data_port: u8, addr: u16) -> u8 {
        self.select_address(addr_port, data_port, addr);
        self.read_raw(data_port)
    }

    /// Write one byte to a 16-bit-addressed EC register.
    pub fn ec_write(&mut self, addr_port: u8, data_port: u8, addr: u16, value: u8) {
        self.select_address(addr_port, data_port, addr);
        self.write_raw(data_port, value);
    }
}
