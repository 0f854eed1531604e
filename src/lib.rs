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

//! Zephyrfan - EC fan stabilizer daemon for ASUS Zephyrus laptops
//!
//! This library provides the EC register transport (indexed port I/O) and the
//! per-fan stabilization state machine that smooths the firmware's erratic
//! duty-cycle behavior, plus the polling service that drives them.

pub mod config;
pub mod ec;
pub mod fan;
pub mod logger;
pub mod service;

#[cfg(test)]
pub mod test_utils;
