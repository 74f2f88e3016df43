use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::SerialStore;

/// Sequential display-serial allocator.
///
/// Serials are a convenience identifier, not a primary key: allocation is
/// best-effort unique, not linearizable. The scan proposes max+1, a final
/// collision check advances one extra increment, and anything beyond that
/// narrow window is the caller's to tolerate. Store unavailability
/// degrades to "no serial" rather than failing the parent record.
pub struct SerialService {
    store: Arc<dyn SerialStore>,
}

impl SerialService {
    pub fn new(store: Arc<dyn SerialStore>) -> Self {
        Self { store }
    }

    /// Next serial as a plain decimal string, or `None` when the store is
    /// unavailable
    pub async fn next_serial(&self) -> Option<String> {
        let serials = match self.store.existing_serials().await {
            Ok(serials) => serials,
            Err(e) => {
                warn!("Serial scan failed, no serial allocated: {}", e);
                return None;
            }
        };

        let max = serials
            .iter()
            .filter_map(|s| parse_serial(s))
            .max()
            .unwrap_or(0);
        let proposed = max + 1;

        // Allocation and persistence are separate steps; re-check the
        // proposed value against a concurrent allocation and advance once
        // instead of failing.
        match self.store.serial_in_use(&proposed.to_string()).await {
            Ok(false) => Some(proposed.to_string()),
            Ok(true) => {
                debug!("Serial {} taken since scan, advancing", proposed);
                Some((proposed + 1).to_string())
            }
            Err(e) => {
                warn!("Serial collision check failed, no serial allocated: {}", e);
                None
            }
        }
    }
}

/// Parse a serial as a plain integer or by the trailing numeric suffix of
/// a prefixed historical form ("PA-9" -> 9). Unparsable and non-positive
/// values yield `None` and are ignored by the scan.
fn parse_serial(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let suffix_len = raw
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if suffix_len == 0 {
        return None;
    }
    let digits = &raw[raw.len() - suffix_len..];
    digits.parse::<u64>().ok().filter(|n| *n > 0)
}
