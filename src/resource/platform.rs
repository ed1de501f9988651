//! Operating system and CPU architecture inference for images and servers

use super::fields::match_keyword;
use serde::{Deserialize, Serialize};
use std::fmt;

/// CPU architecture of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Architecture {
    I32,
    #[default]
    I64,
    Sparc,
    Power,
}

const ARCHITECTURE_KEYWORDS: &[(&str, Architecture)] = &[
    ("32", Architecture::I32),
    ("sparc", Architecture::Sparc),
    ("power", Architecture::Power),
];

impl Architecture {
    /// Infer from a free-text hint such as `i386` or `x86_64`; defaults to 64-bit
    pub fn guess(hint: &str) -> Self {
        match_keyword(hint, ARCHITECTURE_KEYWORDS).unwrap_or_default()
    }
}

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    #[default]
    Unknown,
    /// Some Unix or Linux flavor, distribution not known
    Unix,
    Ubuntu,
    Debian,
    CentOs,
    Rhel,
    Fedora,
    Suse,
    CoreOs,
    FreeBsd,
    OpenBsd,
    Solaris,
    Windows,
}

/// Checked in order; the generic Unix keywords come last
const PLATFORM_KEYWORDS: &[(&str, Platform)] = &[
    ("windows", Platform::Windows),
    ("win2k", Platform::Windows),
    ("ubuntu", Platform::Ubuntu),
    ("debian", Platform::Debian),
    ("centos", Platform::CentOs),
    ("rhel", Platform::Rhel),
    ("red hat", Platform::Rhel),
    ("redhat", Platform::Rhel),
    ("fedora", Platform::Fedora),
    ("suse", Platform::Suse),
    ("coreos", Platform::CoreOs),
    ("freebsd", Platform::FreeBsd),
    ("openbsd", Platform::OpenBsd),
    ("solaris", Platform::Solaris),
    ("linux", Platform::Unix),
    ("unix", Platform::Unix),
];

const ALL_PLATFORMS: &[Platform] = &[
    Platform::Unknown,
    Platform::Unix,
    Platform::Ubuntu,
    Platform::Debian,
    Platform::CentOs,
    Platform::Rhel,
    Platform::Fedora,
    Platform::Suse,
    Platform::CoreOs,
    Platform::FreeBsd,
    Platform::OpenBsd,
    Platform::Solaris,
    Platform::Windows,
];

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Unix => "UNIX",
            Self::Ubuntu => "UBUNTU",
            Self::Debian => "DEBIAN",
            Self::CentOs => "CENT_OS",
            Self::Rhel => "RHEL",
            Self::Fedora => "FEDORA",
            Self::Suse => "SUSE",
            Self::CoreOs => "CORE_OS",
            Self::FreeBsd => "FREE_BSD",
            Self::OpenBsd => "OPEN_BSD",
            Self::Solaris => "SOLARIS",
            Self::Windows => "WINDOWS",
        }
    }

    /// Parse the exact name written by [`Platform::as_str`]
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_PLATFORMS.iter().copied().find(|p| p.as_str() == name)
    }

    /// Guess from free text (image names, `os_type` hints)
    pub fn guess(text: &str) -> Self {
        match_keyword(text, PLATFORM_KEYWORDS).unwrap_or_default()
    }

    /// Replace a weak answer with a more specific guess.
    ///
    /// `Unknown` takes any guess; generic `Unix` takes any specific one.
    pub fn refine(self, guess: Platform) -> Self {
        match (self, guess) {
            (_, Platform::Unknown) => self,
            (Platform::Unknown, g) => g,
            (Platform::Unix, g) => g,
            _ => self,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_guess() {
        assert_eq!(Architecture::guess("i386-32"), Architecture::I32);
        assert_eq!(Architecture::guess("SPARC64"), Architecture::Sparc);
        assert_eq!(Architecture::guess("ppc64le-power8"), Architecture::Power);
        assert_eq!(Architecture::guess("x86_64"), Architecture::I64);
    }

    #[test]
    fn test_platform_guess_first_match_wins() {
        assert_eq!(Platform::guess("Ubuntu 22.04 LTS"), Platform::Ubuntu);
        assert_eq!(Platform::guess("Windows Server 2019 (not linux)"), Platform::Windows);
        assert_eq!(Platform::guess("generic linux"), Platform::Unix);
        assert_eq!(Platform::guess("appliance"), Platform::Unknown);
    }

    #[test]
    fn test_platform_names_round_trip() {
        for p in ALL_PLATFORMS {
            assert_eq!(Platform::from_name(p.as_str()), Some(*p));
        }
        assert_eq!(Platform::from_name("ubuntu"), None);
    }

    #[test]
    fn test_refine() {
        assert_eq!(Platform::Unknown.refine(Platform::Debian), Platform::Debian);
        assert_eq!(Platform::Unix.refine(Platform::Debian), Platform::Debian);
        assert_eq!(Platform::Ubuntu.refine(Platform::Debian), Platform::Ubuntu);
        assert_eq!(Platform::Unix.refine(Platform::Unknown), Platform::Unix);
    }
}
