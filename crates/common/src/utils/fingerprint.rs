//! Stable content fingerprints backed by `blake3`.

/// Incremental fingerprint builder.
///
/// Every part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` hash
/// differently.
#[derive(Default)]
pub struct Fingerprint {
    hasher: blake3::Hasher,
}

impl Fingerprint {
    /// Start an empty fingerprint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one part.
    pub fn update(&mut self, part: &[u8]) -> &mut Self {
        self.hasher.update(&(part.len() as u64).to_le_bytes());
        self.hasher.update(part);
        self
    }

    /// Finish and render as 32 lowercase hex characters.
    pub fn finish_hex(&self) -> String {
        let hex = self.hasher.finalize().to_hex();
        hex.as_str()[..32].to_string()
    }
}

/// Fingerprint of a single byte slice.
pub fn fingerprint(data: &[u8]) -> String {
    Fingerprint::new().update(data).finish_hex()
}
