//! Protocol version negotiation.

use crate::error::ProtocolError;

/// The newest protocol revision this implementation speaks.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Every revision the server accepts during `initialize`, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

pub fn is_supported(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Negotiate the session protocol version.
///
/// A supported requested version is echoed back unchanged; anything else is
/// rejected so the client can retry with a version both sides speak.
pub fn negotiate(requested: &str) -> Result<&'static str, ProtocolError> {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .ok_or_else(|| ProtocolError::UnsupportedProtocolVersion(requested.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_version_is_echoed() {
        assert_eq!(negotiate("2024-11-05").unwrap(), "2024-11-05");
        assert_eq!(negotiate(PROTOCOL_VERSION).unwrap(), PROTOCOL_VERSION);
    }

    #[test]
    fn unknown_version_is_rejected() {
        assert!(matches!(
            negotiate("1999-01-01"),
            Err(ProtocolError::UnsupportedProtocolVersion(_))
        ));
    }

    #[test]
    fn latest_is_listed_first() {
        assert_eq!(SUPPORTED_PROTOCOL_VERSIONS[0], PROTOCOL_VERSION);
    }
}
