//! Chamber model identification
//!
//! Controllers answer `TYPE?` with a free-form string. Only a handful are
//! known; anything else is reported as an unknown chamber instead of failing.

use crate::constants::identity::{KNOWN_MODELS, UNKNOWN_LABEL};

/// Reduce a raw identity string to its canonical model label
pub fn model_label(raw: &str) -> &'static str {
    let raw = raw.trim();
    KNOWN_MODELS
        .iter()
        .find(|(identity, _)| *identity == raw)
        .map(|(_, label)| *label)
        .unwrap_or_else(|| {
            tracing::debug!("Unrecognized chamber identity {:?}", raw);
            UNKNOWN_LABEL
        })
}
