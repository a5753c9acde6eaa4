// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! LZ4 block compression for values passing through the disk tier.
//!
//! Frames carry the uncompressed size, so decompression needs no side
//! channel.

use crate::core::errors::{Error, Result};

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    lz4::block::compress(data, None, true)
        .map_err(|e| Error::Encoding(format!("lz4 compression failed: {e}")))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    lz4::block::decompress(data, None)
        .map_err(|e| Error::Encoding(format!("lz4 decompression failed: {e}")))
}
