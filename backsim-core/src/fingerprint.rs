//! Run fingerprinting.
//!
//! - `config_hash`: BLAKE3 of the canonical JSON of a [`PolicyConfig`]. Two
//!   configs hash equal iff every field is equal.
//! - `event_log_digest`: BLAKE3 over the bit patterns of an event log, so two
//!   runs can be compared for exact determinism without diffing floats.

use crate::domain::OrderEvent;
use crate::policy::PolicyConfig;

pub fn config_hash(config: &PolicyConfig) -> Result<String, serde_json::Error> {
    // Struct fields serialize in declaration order, so the JSON is canonical.
    let json = serde_json::to_string(config)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}

pub fn event_log_digest(events: &[OrderEvent]) -> String {
    let mut hasher = blake3::Hasher::new();
    for e in events {
        hasher.update(&(e.bar_index as u64).to_le_bytes());
        hasher.update(&e.timestamp.to_le_bytes());
        hasher.update(&[e.kind.code()]);
        hasher.update(&e.price.to_bits().to_le_bytes());
        hasher.update(&e.size.to_bits().to_le_bytes());
        match e.realized_pnl {
            Some(pnl) => {
                hasher.update(&[1]);
                hasher.update(&pnl.to_bits().to_le_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
    }
    hasher.finalize().to_hex().to_string()
}
