/// How an upstream resolver's outcome should be classified for caching
/// purposes. Shared by `resolve_batch` and `resolve_one` so the two entry
/// points cannot disagree on NXDOMAIN vs timeout classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// NXDOMAIN or an explicit "no such host" signal — definitive.
    Nxdomain,
    /// The query exceeded its deadline.
    Timeout,
    /// Any other resolver-side failure; treated as a definitive dead
    /// classification for this run (server failure is not retried).
    OtherError,
}

/// Inspect a lowercase-folded error message from an upstream resolver and
/// decide how it should be classified. `hickory_resolver`'s `ResolveError`
/// does expose a structured `ResolveErrorKind`, but timeouts frequently
/// surface as the generic `Timeout` io variant or as a message containing
/// "timed out" depending on which transport is in use (UDP vs the OS
/// resolver), so string matching on the normalized message is the one rule
/// that holds across both upstream implementations in this crate.
pub fn classify_message(message: &str) -> Classification {
    let lower = message.to_ascii_lowercase();
    if lower.contains("no record") || lower.contains("nxdomain") || lower.contains("no such host")
    {
        Classification::Nxdomain
    } else if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline")
    {
        Classification::Timeout
    } else {
        Classification::OtherError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_nxdomain() {
        assert_eq!(
            classify_message("no record found for query"),
            Classification::Nxdomain
        );
        assert_eq!(classify_message("NXDOMAIN"), Classification::Nxdomain);
    }

    #[test]
    fn classifies_timeout() {
        assert_eq!(
            classify_message("operation timed out"),
            Classification::Timeout
        );
        assert_eq!(
            classify_message("deadline exceeded"),
            Classification::Timeout
        );
    }

    #[test]
    fn classifies_other_as_other() {
        assert_eq!(
            classify_message("connection refused"),
            Classification::OtherError
        );
    }
}
