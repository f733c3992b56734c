mod eval;
mod macros;
mod mechanism;
mod record;

pub use eval::SpfVerifier;
pub use macros::{expand, MacroContext, MacroError};
pub use mechanism::{Directive, DualCidr, Mechanism, Qualifier, SpfParseError};
pub use record::SpfRecord;

/// SPF evaluation result (RFC 4408 Section 2.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpfResult {
    /// Sender is authorized.
    Pass,
    /// Sender is NOT authorized.
    Fail,
    /// Weak authorization failure.
    SoftFail,
    /// No assertion made.
    Neutral,
    /// No usable SPF record published.
    None,
    /// Transient DNS failure.
    TempError,
    /// Unusable policy: syntax error, unknown macro, ambiguous records,
    /// lookup or recursion budget exceeded.
    PermError,
}

impl SpfResult {
    /// The protocol's textual result vocabulary, as produced by the
    /// classic spfquery tooling: TempError is "error", PermError "unknown".
    pub fn as_str(&self) -> &'static str {
        match self {
            SpfResult::Pass => "pass",
            SpfResult::Fail => "fail",
            SpfResult::SoftFail => "softfail",
            SpfResult::Neutral => "neutral",
            SpfResult::None => "none",
            SpfResult::TempError => "error",
            SpfResult::PermError => "unknown",
        }
    }
}

impl std::fmt::Display for SpfResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
