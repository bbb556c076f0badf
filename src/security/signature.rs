//! Threat signature hashing for the shared feed.

use sha2::{Digest, Sha256};

use super::scanner::DetectedThreat;

/// Number of pattern characters that take part in the hash
pub const SIGNATURE_PREFIX_CHARS: usize = 50;

/// Length of the hex signature
pub const SIGNATURE_HEX_LEN: usize = 16;

/// Feed signature for a detected threat
pub fn signature_hash(threat: &DetectedThreat) -> String {
    hash_parts(&threat.threat_type, &threat.pattern)
}

/// Hash over `lowercase(type) + ":" + lowercase(pattern[:50])`.
///
/// SHA-256, hex encoded and cut to [`SIGNATURE_HEX_LEN`] characters. The
/// type always takes part, so a bare secret value is never the sole input.
pub fn hash_parts(threat_type: &str, pattern: &str) -> String {
    let prefix: String = pattern.chars().take(SIGNATURE_PREFIX_CHARS).collect();
    let data = format!("{}:{}", threat_type.to_lowercase(), prefix.to_lowercase());

    let digest = Sha256::digest(data.as_bytes());
    let mut hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex.truncate(SIGNATURE_HEX_LEN);
    hex
}
