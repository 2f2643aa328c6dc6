// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Open flags, access-check modes and the textual open-mode mnemonics

use std::str::FromStr;

use bitflags::bitflags;

use crate::error::FsError;

bitflags! {
    /// `open(2)`-style flags. Read-only is the absence of both access bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const WRONLY = libc::O_WRONLY as u32;
        const RDWR = libc::O_RDWR as u32;
        const CREAT = libc::O_CREAT as u32;
        const EXCL = libc::O_EXCL as u32;
        const TRUNC = libc::O_TRUNC as u32;
        const APPEND = libc::O_APPEND as u32;
    }
}

/// Access intent encoded in the low two bits of the open flags
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessIntent {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessIntent {
    pub fn can_read(self) -> bool {
        !matches!(self, AccessIntent::WriteOnly)
    }

    pub fn can_write(self) -> bool {
        !matches!(self, AccessIntent::ReadOnly)
    }
}

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags::empty();

    /// Build from a raw bitmask, keeping unknown bits so `O_ACCMODE` survives.
    pub fn from_raw(bits: u32) -> Self {
        OpenFlags::from_bits_retain(bits)
    }

    pub fn access_intent(&self) -> AccessIntent {
        match self.bits() & libc::O_ACCMODE as u32 {
            b if b == libc::O_RDONLY as u32 => AccessIntent::ReadOnly,
            b if b == libc::O_WRONLY as u32 => AccessIntent::WriteOnly,
            _ => AccessIntent::ReadWrite,
        }
    }

    /// Flags for one of the canonical mnemonics (`r`, `w+`, `ax`, ...).
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        let flags = match mnemonic {
            "r" => OpenFlags::RDONLY,
            "r+" => OpenFlags::RDWR,
            "w" => OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC,
            "wx" => OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC | OpenFlags::EXCL,
            "w+" => OpenFlags::RDWR | OpenFlags::CREAT | OpenFlags::TRUNC,
            "wx+" => OpenFlags::RDWR | OpenFlags::CREAT | OpenFlags::TRUNC | OpenFlags::EXCL,
            "a" => OpenFlags::WRONLY | OpenFlags::APPEND | OpenFlags::CREAT,
            "ax" => OpenFlags::WRONLY | OpenFlags::APPEND | OpenFlags::CREAT | OpenFlags::EXCL,
            "a+" => OpenFlags::RDWR | OpenFlags::APPEND | OpenFlags::CREAT,
            "ax+" => OpenFlags::RDWR | OpenFlags::APPEND | OpenFlags::CREAT | OpenFlags::EXCL,
            _ => return None,
        };
        Some(flags)
    }
}

impl FromStr for OpenFlags {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpenFlags::from_mnemonic(s).ok_or(FsError::InvalidArgument)
    }
}

impl TryFrom<&str> for OpenFlags {
    type Error = FsError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<u32> for OpenFlags {
    fn from(bits: u32) -> Self {
        OpenFlags::from_raw(bits)
    }
}

bitflags! {
    /// `access(2)` mode bits; the empty set is the existence check (`F_OK`).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AccessMode: u32 {
        const READ = libc::R_OK as u32;
        const WRITE = libc::W_OK as u32;
        const EXECUTE = libc::X_OK as u32;
    }
}

impl AccessMode {
    pub const EXISTS: AccessMode = AccessMode::empty();

    /// Validate a raw `access` mode; anything outside `0..=7` is rejected.
    pub fn from_raw(bits: u32) -> Result<Self, FsError> {
        AccessMode::from_bits(bits).ok_or(FsError::InvalidArgument)
    }
}

/// `copy_file` flag requesting failure when the destination exists
pub const COPYFILE_EXCL: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonics() {
        let w: OpenFlags = "w".parse().unwrap();
        assert_eq!(w.access_intent(), AccessIntent::WriteOnly);
        assert!(w.contains(OpenFlags::CREAT | OpenFlags::TRUNC));
        assert!(!w.contains(OpenFlags::EXCL));

        let ax_plus = OpenFlags::from_mnemonic("ax+").unwrap();
        assert_eq!(ax_plus.access_intent(), AccessIntent::ReadWrite);
        assert!(ax_plus.contains(OpenFlags::APPEND | OpenFlags::EXCL));

        assert_eq!(OpenFlags::from_mnemonic("r").unwrap().access_intent(), AccessIntent::ReadOnly);
    }

    #[test]
    fn test_unknown_mnemonic() {
        assert_eq!("zqq".parse::<OpenFlags>(), Err(FsError::InvalidArgument));
        assert_eq!(OpenFlags::try_from("rw"), Err(FsError::InvalidArgument));
    }

    #[test]
    fn test_raw_access_bits() {
        let flags = OpenFlags::from_raw(libc::O_RDWR as u32 | libc::O_CREAT as u32);
        assert_eq!(flags.access_intent(), AccessIntent::ReadWrite);
        assert!(flags.access_intent().can_read());
        assert!(flags.access_intent().can_write());
        assert!(!OpenFlags::RDONLY.access_intent().can_write());
    }

    #[test]
    fn test_access_mode_range() {
        assert_eq!(AccessMode::from_raw(0), Ok(AccessMode::EXISTS));
        assert_eq!(AccessMode::from_raw(7), Ok(AccessMode::all()));
        assert_eq!(AccessMode::from_raw(8), Err(FsError::InvalidArgument));
    }
}
