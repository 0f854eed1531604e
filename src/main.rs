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

use std::path::PathBuf;

use zephyrfan::config::{config_path, load_settings};
use zephyrfan::{logger, service};

fn main() -> anyhow::Result<()> {
    // Port I/O through /dev/port needs root.
    if unsafe { libc::geteuid() } != 0 {
        eprintln!("Error: zephyrfand requires root privileges for EC port access.");
        eprintln!(
            "Please run with: sudo {}",
            std::env::args().next().unwrap_or_else(|| "zephyrfand".to_string())
        );
        std::process::exit(1);
    }

    let args: Vec<String> = std::env::args().collect();

    // Optional logging to /etc/zephyrfan/logs.json
    let logging_enabled = args.iter().any(|a| a == "--logging");
    if logging_enabled {
        logger::init_logging();
        logger::log_event("startup", serde_json::json!({ "args": args }));
    }

    // `--config <path>` overrides the default settings location.
    let path = match args.iter().position(|a| a == "--config") {
        Some(i) => match args.get(i + 1) {
            Some(p) => PathBuf::from(p),
            None => {
                eprintln!("Error: --config requires a path argument");
                std::process::exit(1);
            }
        },
        None => config_path(),
    };
    let settings = load_settings(&path);

    // `--print-config` dumps the effective settings and exits; handy for
    // bootstrapping a config file for a new board revision.
    if args.iter().any(|a| a == "--print-config") {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    service::run_service(&settings, logging_enabled)
}
