// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod cfg;
pub mod contract;
pub mod defaults;
pub mod error;
pub mod framework;
pub mod transport;
pub mod utils;
