//! Requirements identifier for the solver boundary (§3, §6).

use crate::version::VersionRange;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Os {
    All,
    Linux,
    Solaris,
    MacOsX,
    Windows,
    Posix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cpu {
    All,
    Src,
    I386,
    I486,
    I686,
    X64,
    ArmV6L,
    ArmV7L,
    AArch64,
    Ppc,
    Ppc64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Architecture {
    pub os: Os,
    pub cpu: Cpu,
}

impl Architecture {
    pub const ANY: Architecture = Architecture {
        os: Os::All,
        cpu: Cpu::All,
    };

    /// `Linux` beats `Posix` beats `All`; anything else is incomparable and
    /// treated as not OS-compatible by `runs_on`.
    pub fn runs_on(&self, host: Architecture) -> bool {
        let os_ok = match (self.os, host.os) {
            (Os::All, _) => true,
            (Os::Posix, Os::Windows) => false,
            (Os::Posix, _) => true,
            (a, b) => a == b,
        };
        let cpu_ok = match (self.cpu, host.cpu) {
            (Cpu::All, _) => true,
            (Cpu::I386, Cpu::I386 | Cpu::I486 | Cpu::I686 | Cpu::X64) => true,
            (Cpu::I486, Cpu::I486 | Cpu::I686 | Cpu::X64) => true,
            (Cpu::I686, Cpu::I686 | Cpu::X64) => true,
            (a, b) => a == b,
        };
        os_ok && cpu_ok
    }

    /// Specificity rank used by the §4.7 comparer: more specific OS/CPU
    /// wins. Returns `None` for architectures incomparable on this axis
    /// (e.g. `MacOsX` vs `Linux`), which the caller treats as "not better".
    pub fn os_specificity(&self) -> u8 {
        match self.os {
            Os::All => 0,
            Os::Posix => 1,
            _ => 2,
        }
    }

    pub fn cpu_specificity(&self) -> u8 {
        match self.cpu {
            Cpu::All => 0,
            Cpu::I386 => 1,
            Cpu::I486 => 2,
            Cpu::I686 => 3,
            _ => 4,
        }
    }
}

/// `true` if an implementation declaring `candidate` languages satisfies a
/// request for `requested` languages. An empty `candidate` list means "any
/// language"; otherwise a match only needs the base language (the part
/// before an optional `-REGION`/`_REGION` suffix) to agree, e.g. `en-GB`
/// satisfies a request for `en-US`.
pub fn languages_match(candidate: &[String], requested: &[String]) -> bool {
    if candidate.is_empty() {
        return true;
    }
    candidate.iter().any(|c| {
        let base = base_language(c);
        requested.iter().any(|r| base_language(r) == base)
    })
}

fn base_language(lang: &str) -> &str {
    lang.split(['-', '_']).next().unwrap_or(lang)
}

/// Requirements passed across the CLI boundary into the solver (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirements {
    pub interface_uri: String,
    /// `""` means "no command".
    pub command: String,
    pub architecture: Architecture,
    pub languages: Vec<String>,
    pub extra_restrictions: BTreeMap<String, VersionRange>,
}

impl Requirements {
    pub fn new(interface_uri: impl Into<String>) -> Self {
        Requirements {
            interface_uri: interface_uri.into(),
            command: "run".to_string(),
            architecture: Architecture::ANY,
            languages: Vec::new(),
            extra_restrictions: BTreeMap::new(),
        }
    }

    /// Fill in defaults: `command` defaults to `"run"` (or `"compile"` if
    /// the architecture's CPU is `Src`), `languages` defaults to the
    /// current UI locale if empty.
    pub fn normalized(mut self, current_locale: &str) -> Requirements {
        if self.architecture.cpu == Cpu::Src && self.command == "run" {
            self.command = "compile".to_string();
        }
        if self.languages.is_empty() {
            self.languages.push(current_locale.to_string());
        }
        self
    }

    /// On 64-bit hosts, expand to the two ordered alternatives
    /// `(host-arch, x86)` modeling 32-on-64 compatibility.
    pub fn arch_alternatives(&self, host: Architecture) -> Vec<Architecture> {
        let mut out = vec![host];
        if host.cpu == Cpu::X64 {
            out.push(Architecture {
                os: host.os,
                cpu: Cpu::I686,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_beats_posix_beats_all_in_os_specificity() {
        let linux = Architecture { os: Os::Linux, cpu: Cpu::All };
        let posix = Architecture { os: Os::Posix, cpu: Cpu::All };
        let all = Architecture { os: Os::All, cpu: Cpu::All };
        assert!(linux.os_specificity() > posix.os_specificity());
        assert!(posix.os_specificity() > all.os_specificity());
    }

    #[test]
    fn i686_beats_i486_beats_all_in_cpu_specificity() {
        let i686 = Architecture { os: Os::All, cpu: Cpu::I686 };
        let i486 = Architecture { os: Os::All, cpu: Cpu::I486 };
        let all = Architecture { os: Os::All, cpu: Cpu::All };
        assert!(i686.cpu_specificity() > i486.cpu_specificity());
        assert!(i486.cpu_specificity() > all.cpu_specificity());
    }

    #[test]
    fn posix_runs_on_linux_but_not_windows() {
        let posix = Architecture { os: Os::Posix, cpu: Cpu::All };
        let linux_host = Architecture { os: Os::Linux, cpu: Cpu::X64 };
        let windows_host = Architecture { os: Os::Windows, cpu: Cpu::X64 };
        assert!(posix.runs_on(linux_host));
        assert!(!posix.runs_on(windows_host));
    }

    #[test]
    fn x64_host_expands_to_host_then_i686() {
        let reqs = Requirements::new("http://example.com/app.xml");
        let host = Architecture { os: Os::Linux, cpu: Cpu::X64 };
        let alts = reqs.arch_alternatives(host);
        assert_eq!(alts, vec![host, Architecture { os: Os::Linux, cpu: Cpu::I686 }]);
    }

    #[test]
    fn src_cpu_defaults_command_to_compile() {
        let mut reqs = Requirements::new("http://example.com/app.xml");
        reqs.architecture = Architecture { os: Os::All, cpu: Cpu::Src };
        let normalized = reqs.normalized("en-US");
        assert_eq!(normalized.command, "compile");
    }

    #[test]
    fn empty_candidate_languages_match_anything() {
        assert!(languages_match(&[], &["fr".to_string()]));
    }

    #[test]
    fn languages_match_on_base_language_ignoring_region() {
        let candidate = vec!["en-GB".to_string()];
        let requested = vec!["en-US".to_string()];
        assert!(languages_match(&candidate, &requested));
    }

    #[test]
    fn mismatched_base_languages_do_not_match() {
        let candidate = vec!["fr".to_string()];
        let requested = vec!["en-US".to_string()];
        assert!(!languages_match(&candidate, &requested));
    }
}
