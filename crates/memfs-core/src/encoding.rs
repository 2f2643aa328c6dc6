// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Text encodings for names, link targets and string payloads

use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::{FsError, FsResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Utf8,
    Hex,
    Base64,
    /// One byte per char, code points above 0xff are truncated on decode
    Latin1,
}

impl Encoding {
    /// Render raw bytes as text.
    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Hex => hex::encode(bytes),
            Encoding::Base64 => STANDARD.encode(bytes),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }

    /// Turn text written in this encoding back into bytes.
    pub fn decode(&self, text: &str) -> FsResult<Vec<u8>> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Hex => hex::decode(text).map_err(|_| FsError::InvalidArgument),
            Encoding::Base64 => STANDARD.decode(text).map_err(|_| FsError::InvalidArgument),
            Encoding::Latin1 => Ok(text.chars().map(|c| c as u32 as u8).collect()),
        }
    }
}

impl FromStr for Encoding {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "hex" => Ok(Encoding::Hex),
            "base64" => Ok(Encoding::Base64),
            "latin1" | "binary" => Ok(Encoding::Latin1),
            _ => Err(FsError::InvalidArgument),
        }
    }
}
