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

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fan::FanKind;

/// EC register that arbitrates between firmware and host fan control.
pub const FAN_CONTROL_REG: u16 = 0x484;
/// Value handing fan control back to the EC firmware.
pub const CONTROL_ENABLE: u8 = 0;
/// Value keeping the EC firmware's fan logic out of the way.
pub const CONTROL_DISABLE: u8 = 8;

/// Thermal limits and ramp pacing for one power mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeProfile {
    pub cpu_temp_limit: i32,
    pub cpu_high_temp: i32,
    pub gpu_temp_limit: i32,
    pub gpu_high_temp: i32,
    /// Delay before honoring a freshly raised BIOS target, in ms.
    pub fan_start_delay_ms: u64,
    pub cpu_ramp_up_ms: u64,
    pub cpu_ramp_down_ms: u64,
    pub gpu_ramp_up_ms: u64,
    pub gpu_ramp_down_ms: u64,
    pub sys_ramp_up_ms: u64,
    pub sys_ramp_down_ms: u64,
}

impl Default for ModeProfile {
    fn default() -> Self {
        ModeProfile {
            cpu_temp_limit: 87,
            cpu_high_temp: 80,
            gpu_temp_limit: 87,
            gpu_high_temp: 82,
            fan_start_delay_ms: 2000,
            cpu_ramp_up_ms: 2000,
            cpu_ramp_down_ms: 2000,
            gpu_ramp_up_ms: 2000,
            gpu_ramp_down_ms: 2000,
            sys_ramp_up_ms: 1000,
            sys_ramp_down_ms: 1000,
        }
    }
}

/// The six EC registers a single fan is driven through.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FanRegisters {
    pub duty: u16,
    pub tach_low: u16,
    pub tach_high: u16,
    pub target_high: u16,
    pub target_low: u16,
    pub pwm_target: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ec_addr_port: u8,
    pub ec_data_port: u8,
    pub ec_addr_port2: u8,
    pub ec_data_port2: u8,
    pub use_secondary_ports: bool,

    pub poll_interval_ms: u64,

    pub performance: ModeProfile,
    pub turbo: ModeProfile,
    pub silent: ModeProfile,

    pub mode_reg: u16,
    pub cpu_temp_reg: u16,
    pub gpu_temp_reg: u16,
    pub sys_temp_reg: u16,

    pub cpu_fan: FanRegisters,
    pub gpu_fan: FanRegisters,
    pub sys_fan: FanRegisters,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            ec_addr_port: 0x2E,
            ec_data_port: 0x2F,
            ec_addr_port2: 0x2E,
            ec_data_port2: 0x2F,
            use_secondary_ports: true,
            poll_interval_ms: 100,
            performance: ModeProfile::default(),
            turbo: ModeProfile::default(),
            silent: ModeProfile::default(),
            mode_reg: 0x306,
            cpu_temp_reg: 0x358,
            gpu_temp_reg: 0x3C5,
            sys_temp_reg: 0x450,
            cpu_fan: FanRegisters {
                duty: 0x1806,
                tach_low: 0x181E,
                tach_high: 0x181F,
                target_high: 0x4AE,
                target_low: 0x4AF,
                pwm_target: 0x457,
            },
            gpu_fan: FanRegisters {
                duty: 0x1807,
                tach_low: 0x1820,
                tach_high: 0x1821,
                target_high: 0x4B0,
                target_low: 0x4B1,
                pwm_target: 0x44D,
            },
            sys_fan: FanRegisters {
                duty: 0x1808,
                tach_low: 0x1845,
                tach_high: 0x1846,
                target_high: 0x4E4,
                target_low: 0x4E5,
                pwm_target: 0x4E1,
            },
        }
    }
}

impl Settings {
    /// Port pair the EC is actually reachable through on this board.
    pub fn active_ports(&self) -> (u8, u8) {
        if self.use_secondary_ports {
            (self.ec_addr_port2, self.ec_data_port2)
        } else {
            (self.ec_addr_port, self.ec_data_port)
        }
    }

    /// Profile selected by the EC mode register (0x01 turbo, 0x02 silent,
    /// anything else performance).
    pub fn profile_for_mode(&self, mode: u8) -> &ModeProfile {
        match mode {
            0x01 => &self.turbo,
            0x02 => &self.silent,
            _ => &self.performance,
        }
    }

    pub fn fan_registers(&self, kind: FanKind) -> FanRegisters {
        match kind {
            FanKind::Cpu => self.cpu_fan,
            FanKind::Gpu => self.gpu_fan,
            FanKind::Sys => self.sys_fan,
        }
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("zephyrfan").join("config.json");
    }
    if let Ok(home) = env::var("HOME") {
        return Path::new(&home)
            .join(".config")
            .join("zephyrfan")
            .join("config.json");
    }
    PathBuf::from("/etc/zephyrfan/config.json")
}

/// Load settings from `path`. A missing or unreadable document falls back to
/// the compiled-in defaults; a document that parses but fails validation does
/// too, so a typo cannot drive the EC with nonsense addresses.
pub fn load_settings(path: &Path) -> Settings {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(_) => return Settings::default(),
    };
    match serde_json::from_str::<Settings>(&data) {
        Ok(cfg) => match validate_settings(&cfg) {
            Ok(()) => cfg,
            Err(e) => {
                eprintln!("zephyrfan: ignoring {}: {}", path.display(), e);
                Settings::default()
            }
        },
        Err(e) => {
            eprintln!("zephyrfan: ignoring {}: parse error: {}", path.display(), e);
            Settings::default()
        }
    }
}

pub fn save_settings(path: &Path, cfg: &Settings) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let json = serde_json::to_string_pretty(cfg).unwrap_or_else(|_| "{}".to_string());
    fs::write(path, json)
}

fn validate_profile(name: &str, p: &ModeProfile) -> Result<(), String> {
    if p.cpu_high_temp > p.cpu_temp_limit {
        return Err(format!("{}: cpu_high_temp above cpu_temp_limit", name));
    }
    if p.gpu_high_temp > p.gpu_temp_limit {
        return Err(format!("{}: gpu_high_temp above gpu_temp_limit", name));
    }
    let ramps = [
        p.cpu_ramp_up_ms,
        p.cpu_ramp_down_ms,
        p.gpu_ramp_up_ms,
        p.gpu_ramp_down_ms,
        p.sys_ramp_up_ms,
        p.sys_ramp_down_ms,
    ];
    if ramps.iter().any(|&r| r == 0) {
        return Err(format!("{}: ramp intervals must be nonzero", name));
    }
    Ok(())
}

pub fn validate_settings(cfg: &Settings) -> Result<(), String> {
    if cfg.poll_interval_ms == 0 {
        return Err("poll_interval_ms must be nonzero".to_string());
    }
    if cfg.ec_addr_port == cfg.ec_data_port || cfg.ec_addr_port2 == cfg.ec_data_port2 {
        return Err("EC address and data ports must differ".to_string());
    }
    validate_profile("performance", &cfg.performance)?;
    validate_profile("turbo", &cfg.turbo)?;
    validate_profile("silent", &cfg.silent)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_settings_valid() {
        assert!(validate_settings(&Settings::default()).is_ok());
    }

    #[test]
    fn test_default_register_map() {
        let cfg = Settings::default();
        assert_eq!(cfg.mode_reg, 0x306);
        assert_eq!(cfg.cpu_fan.duty, 0x1806);
        assert_eq!(cfg.gpu_fan.pwm_target, 0x44D);
        assert_eq!(cfg.sys_fan.tach_high, 0x1846);
        assert_eq!(cfg.fan_registers(FanKind::Sys), cfg.sys_fan);
    }

    #[test]
    fn test_active_ports_secondary_default() {
        let mut cfg = Settings::default();
        assert_eq!(cfg.active_ports(), (0x2E, 0x2F));
        cfg.ec_addr_port2 = 0x4E;
        cfg.ec_data_port2 = 0x4F;
        assert_eq!(cfg.active_ports(), (0x4E, 0x4F));
        cfg.use_secondary_ports = false;
        assert_eq!(cfg.active_ports(), (0x2E, 0x2F));
    }

    #[test]
    fn test_profile_for_mode() {
        let mut cfg = Settings::default();
        cfg.turbo.cpu_temp_limit = 90;
        cfg.silent.cpu_temp_limit = 84;
        assert_eq!(cfg.profile_for_mode(0x01).cpu_temp_limit, 90);
        assert_eq!(cfg.profile_for_mode(0x02).cpu_temp_limit, 84);
        assert_eq!(cfg.profile_for_mode(0x00).cpu_temp_limit, 87);
        assert_eq!(cfg.profile_for_mode(0x7F).cpu_temp_limit, 87);
    }

    #[test]
    fn test_load_settings_missing_file() {
        let cfg = load_settings(Path::new("/nonexistent/zephyrfan.json"));
        assert_eq!(cfg.poll_interval_ms, 100);
    }

    #[test]
    fn test_load_settings_partial_document() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{{\"poll_interval_ms\": 250, \"turbo\": {{\"cpu_temp_limit\": 92}}}}").unwrap();
        f.flush().unwrap();
        let cfg = load_settings(f.path());
        assert_eq!(cfg.poll_interval_ms, 250);
        assert_eq!(cfg.turbo.cpu_temp_limit, 92);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.turbo.cpu_high_temp, 80);
        assert_eq!(cfg.mode_reg, 0x306);
    }

    #[test]
    fn test_load_settings_malformed_falls_back() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "not json").unwrap();
        f.flush().unwrap();
        let cfg = load_settings(f.path());
        assert_eq!(cfg.cpu_temp_reg, 0x358);
    }

    #[test]
    fn test_load_settings_invalid_falls_back() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{{\"poll_interval_ms\": 0}}").unwrap();
        f.flush().unwrap();
        let cfg = load_settings(f.path());
        assert_eq!(cfg.poll_interval_ms, 100);
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sub").join("config.json");
        let mut cfg = Settings::default();
        cfg.silent.sys_ramp_up_ms = 1500;
        cfg.use_secondary_ports = false;
        save_settings(&path, &cfg).unwrap();
        let loaded = load_settings(&path);
        assert_eq!(loaded.silent.sys_ramp_up_ms, 1500);
        assert!(!loaded.use_secondary_ports);
    }

    #[test]
    fn test_validate_rejects_equal_ports() {
        let mut cfg = Settings::default();
        cfg.ec_data_port2 = cfg.ec_addr_port2;
        assert!(validate_settings(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ramp() {
        let mut cfg = Settings::default();
        cfg.performance.gpu_ramp_down_ms = 0;
        assert!(validate_settings(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_limits() {
        let mut cfg = Settings::default();
        cfg.turbo.cpu_high_temp = 95;
        assert!(validate_settings(&cfg).is_err());
    }

    #[test]
    #[serial]
    fn test_config_path_with_xdg() {
        std::env::set_var("XDG_CONFIG_HOME", "/custom/config");
        let path = config_path();
        assert!(path
            .to_string_lossy()
            .contains("/custom/config/zephyrfan/config.json"));
        std::env::remove_var("XDG_CONFIG_HOME");
    }

    #[test]
    #[serial]
    fn test_config_path_with_home() {
        std::env::remove_var("XDG_CONFIG_HOME");
        std::env::set_var("HOME", "/home/testuser");
        let path = config_path();
        assert!(path
            .to_string_lossy()
            .contains("/home/testuser/.config/zephyrfan/config.json"));
    }
}
