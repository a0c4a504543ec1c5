//! FNV-1a hashing for compact, reproducible cache filter tokens.
//!
//! List cache keys embed a token derived from the query filter. The token must
//! be identical for logically identical filters regardless of parameter order,
//! so parameters are sorted before hashing. Names and values are
//! length-prefixed, so no value can forge a parameter boundary.

/// FNV-1a offset basis (64-bit).
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a prime (64-bit).
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Token used when a list query carries no filter parameters.
pub const UNFILTERED_TOKEN: &str = "all";

/// Computes a 64-bit FNV-1a hash over `bytes`.
///
/// # Examples
///
/// ```
/// use projectdesk_core::hash::fnv1a_hash;
///
/// assert_eq!(fnv1a_hash(b""), 0xcbf2_9ce4_8422_2325); // FNV offset basis
/// assert_eq!(fnv1a_hash(b"a"), 0xaf63_dc4c_8601_ec8c);
/// ```
#[must_use]
pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Appends `{len}:{field}` to the canonical buffer.
fn push_field(canonical: &mut Vec<u8>, field: &str) {
    canonical.extend_from_slice(field.len().to_string().as_bytes());
    canonical.push(b':');
    canonical.extend_from_slice(field.as_bytes());
}

/// Builds the filter token for a list cache key.
///
/// Parameters with empty values are ignored. The remaining pairs are sorted by
/// name, each name and value is written as `{len}:{bytes}`, and the result is
/// hashed. An empty filter yields [`UNFILTERED_TOKEN`].
///
/// # Examples
///
/// ```
/// use projectdesk_core::hash::filter_token;
///
/// assert_eq!(filter_token(&[]), "all");
/// assert_eq!(
///     filter_token(&[("status", "active"), ("owner", "u1")]),
///     filter_token(&[("owner", "u1"), ("status", "active")]),
/// );
/// ```
#[must_use]
pub fn filter_token(params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<&(&str, &str)> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    if pairs.is_empty() {
        return UNFILTERED_TOKEN.to_string();
    }
    pairs.sort_unstable();

    let mut canonical = Vec::new();
    for (name, value) in pairs {
        push_field(&mut canonical, name);
        push_field(&mut canonical, value);
    }
    format!("f{:016x}", fnv1a_hash(&canonical))
}
