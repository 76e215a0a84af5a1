use object_store::path::Path;
use rand::Rng;

pub use jaeger_athena_model::partition::partition_key;

const SUFFIX_LEN: usize = 32;
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// A 32-char alphabetic suffix gives each writer a collision-free object
/// name without any coordination across process instances.
pub fn random_object_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// Object key for a new partition object: `{prefix}{partition}/{suffix}.parquet`.
pub fn object_key(prefix: &str, partition: &str) -> Path {
    Path::from(format!(
        "{prefix}{partition}/{}.parquet",
        random_object_suffix()
    ))
}
