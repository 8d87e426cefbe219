use std::fmt;
use std::path::PathBuf;

/// Error kinds shared by the manifest/digest, feed, and solver layers.
///
/// Filesystem-specific failures (`NotSupported` hardlink/entry-type cases,
/// lock contention) are added to this set by `zi_store`, which wraps this
/// type rather than duplicating it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    InvalidData {
        message: String,
    },
    InvalidPath {
        path: PathBuf,
        reason: PathRejection,
    },
    NotSupported {
        message: String,
    },
    DigestMismatch {
        expected: String,
        actual: String,
        diff: Vec<String>,
    },
    ImplementationNotFound {
        digest: String,
    },
    SolverFailure {
        interface: String,
        report: Vec<String>,
    },
    DependencyCycle {
        cycle: Vec<String>,
    },
    Io {
        message: String,
    },
    UnauthorizedAccess {
        message: String,
    },
    Cancelled,
    WebError {
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathRejection {
    EscapesRoot,
    ReservedName(&'static str),
    ContainsNewline,
}

impl fmt::Display for PathRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRejection::EscapesRoot => write!(f, "path escapes the implementation root"),
            PathRejection::ReservedName(name) => {
                write!(f, "path equals the reserved name '{name}'")
            }
            PathRejection::ContainsNewline => write!(f, "path contains a newline byte"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidData { message } => {
                write!(f, "invalid data: {message}")
            }
            Error::InvalidPath { path, reason } => {
                write!(
                    f,
                    "rejected path '{}': {}\n  hint: manifests may not reference '.manifest', '.xbit', '.symlink', or escape the implementation root",
                    path.display(),
                    reason
                )
            }
            Error::NotSupported { message } => {
                write!(f, "not supported: {message}")
            }
            Error::DigestMismatch {
                expected,
                actual,
                diff,
            } => {
                write!(
                    f,
                    "manifest digest mismatch\n  expected: {expected}\n  actual:   {actual}"
                )?;
                if !diff.is_empty() {
                    write!(f, "\n  differences:")?;
                    for line in diff {
                        write!(f, "\n    {line}")?;
                    }
                }
                write!(
                    f,
                    "\n  hint: the build produced a different tree than the feed declared; this implementation cannot be trusted"
                )
            }
            Error::ImplementationNotFound { digest } => {
                write!(
                    f,
                    "implementation '{digest}' not found in store\n  hint: it may need to be fetched and added first"
                )
            }
            Error::SolverFailure { interface, report } => {
                write!(f, "no selection satisfies requirements for '{interface}'")?;
                for line in report {
                    write!(f, "\n  - {line}")?;
                }
                Ok(())
            }
            Error::DependencyCycle { cycle } => {
                write!(f, "dependency cycle detected: {}", cycle.join(" -> "))
            }
            Error::Io { message } => write!(f, "I/O error: {message}"),
            Error::UnauthorizedAccess { message } => {
                write!(f, "unauthorized access: {message}")
            }
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::WebError { message } => write!(f, "network error: {message}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io {
            message: value.to_string(),
        }
    }
}
