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

use std::time::{Duration, Instant};

use crate::config::{
    FanRegisters, ModeProfile, Settings, CONTROL_DISABLE, CONTROL_ENABLE, FAN_CONTROL_REG,
};
use crate::ec::EcTransport;

/// Duty-cycle ceiling on this EC (0..=200 scale, not 0..=255).
pub const MAX_PWM: u8 = 200;
/// Minimum duty cycle that reliably spins a stalled rotor up.
const KICKSTART_PWM: u8 = 28;
/// Unwinding through the low-duty region is glacial at one unit per step;
/// overshooting fans with a nonzero target are clamped here instead.
const SNAP_DOWN_PWM: u8 = 30;
/// RPM gap under which a fan counts as converged on its target.
const RPM_TOLERANCE: u32 = 25;
/// Tachometer counts are periods of a fixed reference clock.
const TACH_COUNT_FREQ: u32 = 2_156_250;

const PANIC_RAMP_CAP_MS: u64 = 100;
const HIGH_TEMP_RAMP_CAP_MS: u64 = 500;
const SPIN_DOWN_RAMP_CAP_MS: u64 = 500;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FanKind {
    Cpu,
    Gpu,
    Sys,
}

impl FanKind {
    pub fn label(self) -> &'static str {
        match self {
            FanKind::Cpu => "CPU",
            FanKind::Gpu => "GPU",
            FanKind::Sys => "SYS",
        }
    }

    fn ramp_ms(self, profile: &ModeProfile, ramping_up: bool) -> u64 {
        match (self, ramping_up) {
            (FanKind::Cpu, true) => profile.cpu_ramp_up_ms,
            (FanKind::Cpu, false) => profile.cpu_ramp_down_ms,
            (FanKind::Gpu, true) => profile.gpu_ramp_up_ms,
            (FanKind::Gpu, false) => profile.gpu_ramp_down_ms,
            (FanKind::Sys, true) => profile.sys_ramp_up_ms,
            (FanKind::Sys, false) => profile.sys_ramp_down_ms,
        }
    }
}

/// Convert a 16-bit tachometer count to RPM. A zero or saturated count means
/// the rotor is stalled or the reading is unusable; both map to 0.
pub fn tach_to_rpm(count: u16) -> u32 {
    if count == 0 || count == 0xFFFF {
        0
    } else {
        TACH_COUNT_FREQ / u32::from(count)
    }
}

/// Startup-delay gate between the raw BIOS target and the effective target.
///
/// While `Disabled` the effective target is pinned to 0; a sustained positive
/// BIOS target has to survive the profile's start delay before the gate
/// opens. Thermal overrides open it immediately.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Gate {
    Disabled { since: Option<Instant> },
    Enabled,
}

impl Gate {
    fn advance(
        self,
        thermal_override: bool,
        raw_target: u16,
        initialized: bool,
        delay: Duration,
        now: Instant,
    ) -> Gate {
        if thermal_override {
            return Gate::Enabled;
        }
        if raw_target == 0 {
            return Gate::Disabled { since: None };
        }
        // First tick ever: treat the fan as already spun up.
        if !initialized {
            return Gate::Enabled;
        }
        match self {
            Gate::Enabled => Gate::Enabled,
            Gate::Disabled { since } => {
                let since = since.unwrap_or(now);
                if now.duration_since(since) >= delay {
                    Gate::Enabled
                } else {
                    Gate::Disabled { since: Some(since) }
                }
            }
        }
    }
}

/// Per-fan stabilization state machine.
///
/// One instance per physical fan; `update` runs once per poll tick and owns
/// all of this fan's state. The applied PWM never leaves [0, MAX_PWM].
pub struct FanStabilizer {
    kind: FanKind,
    regs: FanRegisters,

    rpm: u32,
    target_rpm: u16,
    temp: i32,
    duty_value: u8,

    active_pwm: u8,
    last_target: Option<u16>,
    locked: bool,
    initialized: bool,
    final_zero_sent: bool,
    gate: Gate,
    last_step: Option<Instant>,
}

impl FanStabilizer {
    pub fn new(kind: FanKind, regs: FanRegisters) -> Self {
        FanStabilizer {
            kind,
            regs,
            rpm: 0,
            target_rpm: 0,
            temp: 0,
            duty_value: 0,
            active_pwm: 0,
            last_target: None,
            locked: false,
            initialized: false,
            final_zero_sent: false,
            gate: Gate::Disabled { since: None },
            last_step: None,
        }
    }

    pub fn kind(&self) -> FanKind {
        self.kind
    }

    /// Last measured fan speed.
    pub fn rpm(&self) -> u32 {
        self.rpm
    }

    /// Effective target after the startup-delay gate.
    pub fn target_rpm(&self) -> u16 {
        self.target_rpm
    }

    /// Temperature shown for this fan (GPU fan: GPU sensor, SYS fan: system
    /// sensor, CPU fan: CPU sensor).
    pub fn temp(&self) -> i32 {
        self.temp
    }

    /// Raw duty-cycle register value as last sampled.
    pub fn duty_value(&self) -> u8 {
        self.duty_value
    }

    /// Duty cycle this controller currently holds the fan at.
    pub fn applied_pwm(&self) -> u8 {
        self.active_pwm
    }

    pub fn update(&mut self, ec: &mut EcTransport, cfg: &Settings) {
        self.update_at(ec, cfg, Instant::now());
    }

    /// One stabilization tick at an explicit point in time.
    pub fn update_at(&mut self, ec: &mut EcTransport, cfg: &Settings, now: Instant) {
        let (ap, dp) = cfg.active_ports();

        // Sample mode, speeds, duty and temperatures.
        let mode = ec.ec_read(ap, dp, cfg.mode_reg);
        let profile = cfg.profile_for_mode(mode);

        self.rpm = self.read_rpm(ec, ap, dp);
        let raw_target = self.read_bios_target(ec, ap, dp);
        self.duty_value = ec.ec_read(ap, dp, self.regs.duty);

        let cpu_temp = i32::from(ec.ec_read(ap, dp, cfg.cpu_temp_reg));
        let gpu_temp = i32::from(ec.ec_read(ap, dp, cfg.gpu_temp_reg));
        self.temp = match self.kind {
            FanKind::Cpu => cpu_temp,
            FanKind::Gpu => gpu_temp,
            FanKind::Sys => i32::from(ec.ec_read(ap, dp, cfg.sys_temp_reg)),
        };

        // Thermal state is shared: every fan reacts to CPU/GPU limits.
        let thermal_panic =
            cpu_temp >= profile.cpu_temp_limit || gpu_temp >= profile.gpu_temp_limit;
        let high_temp = cpu_temp >= profile.cpu_high_temp || gpu_temp >= profile.gpu_high_temp;

        self.gate = self.gate.advance(
            thermal_panic || high_temp,
            raw_target,
            self.initialized,
            Duration::from_millis(profile.fan_start_delay_ms),
            now,
        );
        self.target_rpm = match self.gate {
            Gate::Disabled { .. } => 0,
            Gate::Enabled => raw_target,
        };

        // First tick: adopt whatever duty cycle the EC is currently driving.
        if !self.initialized {
            self.active_pwm = ec.ec_read(ap, dp, self.regs.pwm_target).min(MAX_PWM);
            self.last_target = Some(self.target_rpm);
            self.initialized = true;
        }

        if self.target_rpm > 0 {
            self.final_zero_sent = false;
            // A stalled rotor under demand gets kicked to spin-up duty right
            // away, ramp timer or not.
            if self.rpm == 0 && self.active_pwm < KICKSTART_PWM {
                self.active_pwm = KICKSTART_PWM;
                self.apply_pwm(ec, cfg);
                self.locked = false;
            }
        } else if self.rpm == 0 && !self.final_zero_sent {
            // Fan at rest with no demand: command it off once, not every tick.
            self.active_pwm = 0;
            self.apply_pwm(ec, cfg);
            self.final_zero_sent = true;
        }

        // Converged and the target has not moved: keep firmware control
        // parked off and leave the duty cycle alone.
        if self.locked && Some(self.target_rpm) == self.last_target {
            ec.ec_write(ap, dp, FAN_CONTROL_REG, CONTROL_DISABLE);
            return;
        }

        let ramping_up = self.rpm < u32::from(self.target_rpm);
        let base_ramp = self.kind.ramp_ms(profile, ramping_up);
        let ramp_ms = if ramping_up {
            if thermal_panic {
                base_ramp.min(PANIC_RAMP_CAP_MS)
            } else if high_temp {
                base_ramp.min(HIGH_TEMP_RAMP_CAP_MS)
            } else {
                base_ramp
            }
        } else if self.target_rpm == 0 {
            base_ramp.min(SPIN_DOWN_RAMP_CAP_MS)
        } else {
            base_ramp
        };

        let gap = self.rpm.abs_diff(u32::from(self.target_rpm));
        if gap <= RPM_TOLERANCE && self.target_rpm > 1 {
            self.locked = true;
            self.last_target = Some(self.target_rpm);
            return;
        }

        let due = self
            .last_step
            .map_or(true, |t| now.duration_since(t) >= Duration::from_millis(ramp_ms));
        if due {
            self.locked = false;
            let mut changed = false;

            if ramping_up && self.active_pwm < MAX_PWM {
                self.active_pwm += 1;
                changed = true;
            } else if self.rpm > u32::from(self.target_rpm) {
                if self.target_rpm == 0 {
                    if self.active_pwm > 0 {
                        self.active_pwm -= 1;
                        changed = true;
                    }
                } else if self.active_pwm <= SNAP_DOWN_PWM {
                    if self.active_pwm != SNAP_DOWN_PWM {
                        self.active_pwm = SNAP_DOWN_PWM;
                        changed = true;
                    }
                } else {
                    self.active_pwm -= 1;
                    changed = true;
                }
            }

            if changed {
                self.apply_pwm(ec, cfg);
                self.last_step = Some(now);
            }
            self.last_target = Some(self.target_rpm);
        }
    }

    /// Push the applied duty cycle to the EC: park firmware control, then
    /// write the PWM target and duty registers.
    fn apply_pwm(&mut self, ec: &mut EcTransport, cfg: &Settings) {
        let (ap, dp) = cfg.active_ports();
        // The SYS fan's PWM-to-duty mapping is off by one in the interior of
        // the range; 0 and MAX_PWM must pass through untouched.
        let value = if self.kind == FanKind::Sys
            && self.active_pwm > 0
            && self.active_pwm < MAX_PWM
        {
            self.active_pwm + 1
        } else {
            self.active_pwm
        };
        ec.ec_write(ap, dp, FAN_CONTROL_REG, CONTROL_DISABLE);
        ec.ec_write(ap, dp, self.regs.pwm_target, value);
        ec.ec_write(ap, dp, self.regs.duty, value);
    }

    /// Final write at process exit: zero the duty cycle and hand fan control
    /// back to the EC firmware. Fire-and-forget.
    pub fn shutdown(&mut self, ec: &mut EcTransport, cfg: &Settings) {
        let (ap, dp) = cfg.active_ports();
        ec.ec_write(ap, dp, self.regs.duty, 0x00);
        ec.ec_write(ap, dp, FAN_CONTROL_REG, CONTROL_ENABLE);
    }

    fn read_rpm(&mut self, ec: &mut EcTransport, ap: u8, dp: u8) -> u32 {
        let count = u16::from(ec.ec_read(ap, dp, self.regs.tach_low))
            | (u16::from(ec.ec_read(ap, dp, self.regs.tach_high)) << 8);
        tach_to_rpm(count)
    }

    fn read_bios_target(&mut self, ec: &mut EcTransport, ap: u8, dp: u8) -> u16 {
        (u16::from(ec.ec_read(ap, dp, self.regs.target_high)) << 8)
            | u16::from(ec.ec_read(ap, dp, self.regs.target_low))
    }
}
