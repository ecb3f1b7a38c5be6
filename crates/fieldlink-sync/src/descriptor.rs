//! Connection descriptor decoding.
//!
//! The desktop device shows a QR code; the scanner hands us the decoded
//! text. That text is either a full WebSocket URI or a bare `host:port`.

use std::fmt;

use crate::error::DescriptorError;

/// Scheme used when the scanned text carries none.
pub const DEFAULT_SCHEME: &str = "ws://";

const SCHEMES: [&str; 2] = ["ws://", "wss://"];

/// Address of the peer's channel endpoint, always with a scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelAddress(String);

impl ChannelAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_secure(&self) -> bool {
        self.0
            .get(..6)
            .map_or(false, |prefix| prefix.eq_ignore_ascii_case("wss://"))
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Turn scanned text into a channel address.
///
/// Text already carrying `ws://` or `wss://` is used unmodified (after
/// trimming). Anything else gets `ws://` prepended. Pure, no I/O.
pub fn decode(scanned: &str) -> Result<ChannelAddress, DescriptorError> {
    let text = scanned.trim();
    if text.is_empty() {
        return Err(DescriptorError::Empty);
    }
    if let Some(c) = text.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(DescriptorError::InvalidCharacter(c));
    }

    let lower = text.to_ascii_lowercase();
    if let Some(scheme) = SCHEMES.iter().find(|s| lower.starts_with(**s)) {
        if text.len() == scheme.len() {
            return Err(DescriptorError::Empty);
        }
        return Ok(ChannelAddress(text.to_string()));
    }
    if let Some((scheme, _)) = text.split_once("://") {
        return Err(DescriptorError::UnsupportedScheme(scheme.to_string()));
    }
    Ok(ChannelAddress(format!("{}{}", DEFAULT_SCHEME, text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_gets_default_scheme() {
        let addr = decode("192.168.1.20:8765").unwrap();
        assert_eq!(addr.as_str(), "ws://192.168.1.20:8765");
        assert!(!addr.is_secure());
    }

    #[test]
    fn test_known_scheme_kept() {
        assert_eq!(
            decode("ws://10.0.0.2:9000/sync").unwrap().as_str(),
            "ws://10.0.0.2:9000/sync"
        );
        let secure = decode("  WSS://desk.local:443 ").unwrap();
        assert_eq!(secure.as_str(), "WSS://desk.local:443");
        assert!(secure.is_secure());
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(decode("   "), Err(DescriptorError::Empty));
        assert_eq!(decode("ws://"), Err(DescriptorError::Empty));
        assert_eq!(
            decode("10.0.0.2 9000"),
            Err(DescriptorError::InvalidCharacter(' '))
        );
        assert_eq!(
            decode("10.0.0.2:9000\u{7}"),
            Err(DescriptorError::InvalidCharacter('\u{7}'))
        );
        assert_eq!(
            decode("http://10.0.0.2"),
            Err(DescriptorError::UnsupportedScheme("http".into()))
        );
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decoded_addresses_carry_a_ws_scheme(input in "\\PC{0,40}") {
                if let Ok(addr) = decode(&input) {
                    let lower = addr.as_str().to_ascii_lowercase();
                    prop_assert!(lower.starts_with("ws://") || lower.starts_with("wss://"));
                    prop_assert!(!addr.as_str().chars().any(char::is_whitespace));
                }
            }

            #[test]
            fn decode_is_idempotent(host in "[a-z0-9.]{1,20}", port in 1u16..) {
                let once = decode(&format!("{}:{}", host, port)).unwrap();
                let twice = decode(once.as_str()).unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }
}
