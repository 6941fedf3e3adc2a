//! Key filtering
//!
//! - `KeyAllowList`: GPG key ids, suffix-tolerant matching
//! - `FingerprintAllowList`: SSH key fingerprints, prefix matching

mod allowlist;
mod fingerprint;

pub use allowlist::{KeyAllowList, normalize_key_id};
pub use fingerprint::FingerprintAllowList;
