//! Platform spec: an `{os, arch}` pair with a compatibility predicate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationErrorKind;

/// Operating systems a TTP's `requirements.platforms` entry can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// android
    Android,
    /// darwin (macOS)
    Darwin,
    /// dragonfly
    Dragonfly,
    /// freebsd
    Freebsd,
    /// linux
    Linux,
    /// netbsd
    Netbsd,
    /// openbsd
    Openbsd,
    /// plan9
    Plan9,
    /// solaris
    Solaris,
    /// windows
    Windows,
}

impl Os {
    fn from_str_loose(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "android" => Self::Android,
            "darwin" | "macos" => Self::Darwin,
            "dragonfly" => Self::Dragonfly,
            "freebsd" => Self::Freebsd,
            "linux" => Self::Linux,
            "netbsd" => Self::Netbsd,
            "openbsd" => Self::Openbsd,
            "plan9" => Self::Plan9,
            "solaris" => Self::Solaris,
            "windows" => Self::Windows,
            _ => return None,
        })
    }

    /// The current process's OS, mapped onto this enum.
    #[must_use]
    pub fn current() -> Option<Self> {
        Self::from_str_loose(std::env::consts::OS)
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Android => "android",
            Self::Darwin => "darwin",
            Self::Dragonfly => "dragonfly",
            Self::Freebsd => "freebsd",
            Self::Linux => "linux",
            Self::Netbsd => "netbsd",
            Self::Openbsd => "openbsd",
            Self::Plan9 => "plan9",
            Self::Solaris => "solaris",
            Self::Windows => "windows",
        };
        f.write_str(s)
    }
}

/// CPU architectures a TTP's `requirements.platforms` entry can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// 386
    #[serde(rename = "386")]
    X86,
    /// amd64
    Amd64,
    /// arm
    Arm,
    /// arm64
    Arm64,
    /// mips
    Mips,
    /// mips64
    Mips64,
    /// ppc64
    Ppc64,
    /// riscv64
    Riscv64,
    /// s390x
    S390x,
    /// wasm
    Wasm,
}

impl Arch {
    fn from_str_loose(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "386" | "x86" => Self::X86,
            "amd64" | "x86_64" => Self::Amd64,
            "arm" => Self::Arm,
            "arm64" | "aarch64" => Self::Arm64,
            "mips" => Self::Mips,
            "mips64" => Self::Mips64,
            "ppc64" | "powerpc64" => Self::Ppc64,
            "riscv64" => Self::Riscv64,
            "s390x" => Self::S390x,
            "wasm" | "wasm32" => Self::Wasm,
            _ => return None,
        })
    }

    /// The current process's architecture, mapped onto this enum.
    #[must_use]
    pub fn current() -> Option<Self> {
        Self::from_str_loose(std::env::consts::ARCH)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::X86 => "386",
            Self::Amd64 => "amd64",
            Self::Arm => "arm",
            Self::Arm64 => "arm64",
            Self::Mips => "mips",
            Self::Mips64 => "mips64",
            Self::Ppc64 => "ppc64",
            Self::Riscv64 => "riscv64",
            Self::S390x => "s390x",
            Self::Wasm => "wasm",
        };
        f.write_str(s)
    }
}

/// An `{os, arch}` pair; either field being absent means "any".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Required OS, or `None` for "any OS".
    #[serde(default)]
    pub os: Option<Os>,
    /// Required architecture, or `None` for "any architecture".
    #[serde(default)]
    pub arch: Option<Arch>,
}

impl Platform {
    /// The platform this process is currently running on.
    #[must_use]
    pub fn current() -> Self {
        Self {
            os: Os::current(),
            arch: Arch::current(),
        }
    }

    /// Parse from raw os/arch strings, for validation of TTP YAML that may
    /// name an unrecognised value.
    pub fn from_raw(os: Option<&str>, arch: Option<&str>) -> Result<Self, ValidationErrorKind> {
        if os.is_none() && arch.is_none() {
            return Err(ValidationErrorKind::EmptyPlatformSpec);
        }
        let os = os
            .map(|s| Os::from_str_loose(s).ok_or_else(|| ValidationErrorKind::UnknownOs(s.into())))
            .transpose()?;
        let arch = arch
            .map(|s| {
                Arch::from_str_loose(s).ok_or_else(|| ValidationErrorKind::UnknownArch(s.into()))
            })
            .transpose()?;
        Ok(Self { os, arch })
    }

    /// True if, for each field `self` sets, `other` equals it. An unset
    /// field on `self` matches anything.
    #[must_use]
    pub fn compatible_with(&self, other: &Self) -> bool {
        let os_ok = match self.os {
            Some(os) => other.os == Some(os),
            None => true,
        };
        let arch_ok = match self.arch {
            Some(arch) => other.arch == Some(arch),
            None => true,
        };
        os_ok && arch_ok
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let os = self
            .os
            .map(|o| o.to_string())
            .unwrap_or_else(|| "[any OS]".to_string());
        let arch = self
            .arch
            .map(|a| a.to_string())
            .unwrap_or_else(|| "[any architecture]".to_string());
        write!(f, "{os}/{arch}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_spec_matches_anything_field_wise() {
        let any = Platform::default();
        let linux_amd64 = Platform {
            os: Some(Os::Linux),
            arch: Some(Arch::Amd64),
        };
        assert!(any.compatible_with(&linux_amd64));
        assert!(!linux_amd64.compatible_with(&any));
    }

    #[test]
    fn both_fields_must_match_when_set() {
        let wants = Platform {
            os: Some(Os::Linux),
            arch: Some(Arch::Arm64),
        };
        let have = Platform {
            os: Some(Os::Linux),
            arch: Some(Arch::Amd64),
        };
        assert!(!wants.compatible_with(&have));
    }

    #[test]
    fn display_uses_placeholder_for_unset_fields() {
        let p = Platform {
            os: Some(Os::Linux),
            arch: None,
        };
        assert_eq!(p.to_string(), "linux/[any architecture]");
    }

    #[test]
    fn from_raw_rejects_fully_empty_spec() {
        assert!(Platform::from_raw(None, None).is_err());
    }

    #[test]
    fn from_raw_rejects_unknown_values() {
        assert!(Platform::from_raw(Some("beos"), None).is_err());
    }
}
