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

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::json;

use crate::config::{Settings, CONTROL_ENABLE, FAN_CONTROL_REG};
use crate::ec::{DevPortIo, EcTransport, NullPortIo, PortIo};
use crate::fan::{FanKind, FanStabilizer};
use crate::logger;

/// Global shutdown flag for clean termination.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Status events are emitted once per this many ticks when logging is on.
const STATUS_EVERY_TICKS: u64 = 50;

fn open_channel(logging: bool) -> Box<dyn PortIo> {
    match DevPortIo::open() {
        Ok(io) => Box::new(io),
        Err(e) => {
            // Non-fatal: keep polling with a dead channel. Every read comes
            // back 0 and every write is dropped until a restart.
            eprintln!("zephyrfan: port I/O unavailable ({}), running degraded", e);
            if logging {
                logger::log_event("channel_init_failed", json!({ "error": e.to_string() }));
            }
            Box::new(NullPortIo)
        }
    }
}

fn build_fans(cfg: &Settings) -> [FanStabilizer; 3] {
    [
        FanStabilizer::new(FanKind::Cpu, cfg.fan_registers(FanKind::Cpu)),
        FanStabilizer::new(FanKind::Gpu, cfg.fan_registers(FanKind::Gpu)),
        FanStabilizer::new(FanKind::Sys, cfg.fan_registers(FanKind::Sys)),
    ]
}

fn status_data(fans: &[FanStabilizer]) -> serde_json::Value {
    json!(fans
        .iter()
        .map(|f| {
            json!({
                "fan": f.kind().label(),
                "rpm": f.rpm(),
                "target_rpm": f.target_rpm(),
                "temp_c": f.temp(),
                "duty": f.duty_value(),
                "applied_pwm": f.applied_pwm(),
            })
        })
        .collect::<Vec<_>>())
}

/// Hand fan control back to the EC firmware: global control-enable first, a
/// short settle, then each fan's duty cycle zeroed. Best-effort throughout.
pub fn restore_ec_control(ec: &mut EcTransport, cfg: &Settings, fans: &mut [FanStabilizer]) {
    let (ap, dp) = cfg.active_ports();
    ec.ec_write(ap, dp, FAN_CONTROL_REG, CONTROL_ENABLE);
    thread::sleep(Duration::from_millis(50));
    for fan in fans.iter_mut() {
        fan.shutdown(ec, cfg);
    }
}

/// Run the stabilization loop until SIGINT/SIGTERM.
pub fn run_service(cfg: &Settings, logging: bool) -> Result<()> {
    eprintln!("zephyrfan: starting stabilizer service");

    ctrlc::set_handler(|| {
        SHUTDOWN.store(true, Ordering::SeqCst);
    })
    .context("install signal handler")?;

    let mut ec = EcTransport::new(open_channel(logging));
    let mut fans = build_fans(cfg);

    let interval = Duration::from_millis(cfg.poll_interval_ms);
    let mut last = Instant::now() - interval;
    let mut ticks: u64 = 0;

    while !SHUTDOWN.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now.duration_since(last) < interval {
            thread::sleep(Duration::from_millis(10));
            continue;
        }
        last = now;
        ticks += 1;

        // One full pass per tick, fans in fixed order. Mode and temperature
        // registers are re-sampled by each fan; no cross-fan snapshot.
        for fan in fans.iter_mut() {
            fan.update(&mut ec, cfg);
        }

        if logging && ticks % STATUS_EVERY_TICKS == 0 {
            logger::log_event("status", status_data(&fans));
        }
    }

    eprintln!("zephyrfan: shutting down, restoring EC fan control");
    restore_ec_control(&mut ec, cfg, &mut fans);
    if logging {
        logger::log_event("shutdown", json!({ "ticks": ticks }));
    }
    Ok(())
}
