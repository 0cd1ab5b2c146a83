use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh3::Xxh3;

/// Satchel needs a hasher for the identifiers it bakes into bundle names and
/// cache keys.
///
/// The hashes don't need to be incredibly fast, but they must be stable
/// across runs, machines, platforms and versions, because they end up in
/// output filenames and on-disk cache entries.
pub type IdentifierHasher = Xxh3;

pub fn hash_string(s: impl AsRef<str>) -> String {
  hash_bytes(s.as_ref().as_bytes())
}

pub fn hash_bytes(s: &[u8]) -> String {
  let res = xxh3_64(s);
  format!("{:016x}", res)
}
