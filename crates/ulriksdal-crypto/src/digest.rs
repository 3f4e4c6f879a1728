#![forbid(unsafe_code)]

//! Digest (hash) algorithm implementations.

use digest::Digest;
use subtle::ConstantTimeEq;
use ulriksdal_core::{algorithm, Error};

/// Trait for digest algorithms.
pub trait DigestAlgorithm: Send {
    /// Feed data into the hash.
    fn update(&mut self, data: &[u8]);
    /// Finalize and return the hash value.
    fn finalize(self: Box<Self>) -> Vec<u8>;
    /// Algorithm URI.
    fn uri(&self) -> &'static str;
}

/// Constructor of a boxed built-in digest.
pub type BuiltinDigest = fn() -> Box<dyn DigestAlgorithm>;

/// Built-in digest algorithms, keyed by URI.
pub fn builtin() -> Vec<(&'static str, BuiltinDigest)> {
    #[allow(unused_mut)]
    let mut list: Vec<(&'static str, BuiltinDigest)> = vec![
        (algorithm::SHA1, Sha1Digest::boxed),
        (algorithm::SHA224, Sha224Digest::boxed),
        (algorithm::SHA256, Sha256Digest::boxed),
        (algorithm::SHA384, Sha384Digest::boxed),
        (algorithm::SHA512, Sha512Digest::boxed),
        (algorithm::SHA3_224, Sha3_224Digest::boxed),
        (algorithm::SHA3_256, Sha3_256Digest::boxed),
        (algorithm::SHA3_384, Sha3_384Digest::boxed),
        (algorithm::SHA3_512, Sha3_512Digest::boxed),
    ];
    #[cfg(feature = "legacy-algorithms")]
    {
        list.push((algorithm::MD5, Md5Digest::boxed));
        list.push((algorithm::RIPEMD160, Ripemd160Digest::boxed));
    }
    list
}

/// Create a built-in digest algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn DigestAlgorithm>, Error> {
    builtin()
        .into_iter()
        .find(|(u, _)| *u == uri)
        .map(|(_, make)| make())
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("digest algorithm: {uri}")))
}

/// Compute a built-in digest in one shot.
pub fn digest(uri: &str, data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut hasher = from_uri(uri)?;
    hasher.update(data);
    Ok(hasher.finalize())
}

/// Compare two digest values without an early exit on the first
/// differing byte.
pub fn digests_equal(computed: &[u8], expected: &[u8]) -> bool {
    computed.len() == expected.len() && bool::from(computed.ct_eq(expected))
}

// ── Concrete implementations ─────────────────────────────────────────

macro_rules! impl_digest {
    ($name:ident, $hasher:ty, $uri:expr) => {
        struct $name {
            inner: $hasher,
        }

        impl $name {
            fn boxed() -> Box<dyn DigestAlgorithm> {
                Box::new(Self {
                    inner: <$hasher>::new(),
                })
            }
        }

        impl DigestAlgorithm for $name {
            fn update(&mut self, data: &[u8]) {
                Digest::update(&mut self.inner, data);
            }

            fn finalize(self: Box<Self>) -> Vec<u8> {
                Digest::finalize(self.inner).to_vec()
            }

            fn uri(&self) -> &'static str {
                $uri
            }
        }
    };
}

impl_digest!(Sha1Digest, sha1::Sha1, algorithm::SHA1);
impl_digest!(Sha224Digest, sha2::Sha224, algorithm::SHA224);
impl_digest!(Sha256Digest, sha2::Sha256, algorithm::SHA256);
impl_digest!(Sha384Digest, sha2::Sha384, algorithm::SHA384);
impl_digest!(Sha512Digest, sha2::Sha512, algorithm::SHA512);
impl_digest!(Sha3_224Digest, sha3::Sha3_224, algorithm::SHA3_224);
impl_digest!(Sha3_256Digest, sha3::Sha3_256, algorithm::SHA3_256);
impl_digest!(Sha3_384Digest, sha3::Sha3_384, algorithm::SHA3_384);
impl_digest!(Sha3_512Digest, sha3::Sha3_512, algorithm::SHA3_512);

#[cfg(feature = "legacy-algorithms")]
impl_digest!(Md5Digest, md5::Md5, algorithm::MD5);

#[cfg(feature = "legacy-algorithms")]
impl_digest!(Ripemd160Digest, ripemd::Ripemd160, algorithm::RIPEMD160);
