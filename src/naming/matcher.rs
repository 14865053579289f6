use crate::naming::PublicKey;

/// Find the first domain key whose bytes equal the signing key
///
/// Keys are checked in the order the key source returned them, so with
/// duplicate key bytes the first listed ID wins. An empty signing key
/// never matches.
pub fn match_key<'a>(signing_key: &[u8], domain_keys: &'a [PublicKey]) -> Option<&'a PublicKey> {
    if signing_key.is_empty() {
        return None;
    }

    domain_keys.iter().find(|k| k.key == signing_key)
}
