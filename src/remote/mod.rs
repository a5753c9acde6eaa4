// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod async_db;
pub mod loopback;
pub mod proxy;
pub mod wait_async;
