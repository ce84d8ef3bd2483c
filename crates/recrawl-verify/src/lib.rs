//! Slow, thorough verifier that re-checks domains a recrawl run marked
//! dead, across independent DNS upstreams and both HTTP schemes.
//!
//! Not a runtime path for `run`/`resume`: [`Verifier`] is invoked once,
//! after a run, over the domains recorded in the failure store.

pub mod dns_check;
pub mod error;
pub mod http_check;
pub mod verifier;

pub use dns_check::{DnsCheck, DnsCheckers};
pub use error::VerifyError;
pub use http_check::{check_http, HttpCheck};
pub use verifier::{Verifier, VerifierOptions, VerifySummary};
