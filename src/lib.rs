// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Ground support equipment for analog sensor ASIC characterization
//!
//! Drives a signal source and an acquisition device through per-channel
//! hardware sessions, and measures the output noise spectral density, the
//! dynamic (sine sweep) and static (DC sweep) transfer functions of the ASIC.

pub mod command;
pub mod config;
pub mod daemon;
pub mod hardware;
pub mod measurement;
pub mod progress;
pub mod server;
pub mod spectral;
pub mod storage;
pub mod utility;
