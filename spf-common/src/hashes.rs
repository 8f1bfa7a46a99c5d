// spf-common/src/hashes.rs
//! Accepted content digests and streaming verification against them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

use sha2::digest::DynDigest;
use thiserror::Error;
use tracing::debug;

use crate::error::{Result, SpfError};

/// Chunk size used when hashing readers.
pub const HASH_CHUNK_SIZE: usize = 10 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 6] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    fn new_digest(&self) -> Box<dyn DynDigest + Send> {
        match self {
            HashAlgorithm::Md5 => Box::new(md5::Md5::default()),
            HashAlgorithm::Sha1 => Box::new(sha1::Sha1::default()),
            HashAlgorithm::Sha224 => Box::new(sha2::Sha224::default()),
            HashAlgorithm::Sha256 => Box::new(sha2::Sha256::default()),
            HashAlgorithm::Sha384 => Box::new(sha2::Sha384::default()),
            HashAlgorithm::Sha512 => Box::new(sha2::Sha512::default()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = SpfError;

    fn from_str(s: &str) -> Result<Self> {
        HashAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SpfError::Generic(format!("Unsupported hash algorithm '{s}'")))
    }
}

/// Raised when none of the requested digests match the fetched bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Content digest mismatch:{}", describe_mismatch(.allowed, .got))]
pub struct HashMismatch {
    pub allowed: BTreeMap<HashAlgorithm, Vec<String>>,
    pub got: BTreeMap<HashAlgorithm, String>,
}

fn describe_mismatch(
    allowed: &BTreeMap<HashAlgorithm, Vec<String>>,
    got: &BTreeMap<HashAlgorithm, String>,
) -> String {
    let mut out = String::new();
    for (alg, expected) in allowed {
        out.push_str(&format!("\n    Expected {alg} {}", expected.join(" or ")));
        if let Some(actual) = got.get(alg) {
            out.push_str(&format!("\n         Got {actual}"));
        }
    }
    out
}

/// Accepted digests per algorithm. Empty means no verification was requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hashes {
    allowed: BTreeMap<HashAlgorithm, BTreeSet<String>>,
}

impl Hashes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an accepted hex digest. Digests are stored lowercase.
    pub fn insert(&mut self, algorithm: HashAlgorithm, hex_digest: &str) {
        self.allowed
            .entry(algorithm)
            .or_default()
            .insert(hex_digest.trim().to_ascii_lowercase());
    }

    /// Parses `alg=hex` or `alg:hex`.
    pub fn parse_pair(pair: &str) -> Result<(HashAlgorithm, String)> {
        let (name, digest) = pair
            .split_once('=')
            .or_else(|| pair.split_once(':'))
            .ok_or_else(|| {
                SpfError::Generic(format!(
                    "Invalid hash '{pair}': expected <algorithm>=<hexdigest>"
                ))
            })?;
        let algorithm = name.parse::<HashAlgorithm>()?;
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SpfError::Generic(format!(
                "Invalid {algorithm} digest '{digest}': not a hex string"
            )));
        }
        Ok((algorithm, digest.to_string()))
    }

    /// Collects every `alg=hex` pair found in a URL fragment. Pairs may be
    /// separated by `&` or by repeated `#`. Unknown algorithms are skipped.
    pub fn from_fragment(fragment: &str) -> Self {
        let mut hashes = Hashes::new();
        for pair in fragment.split(['&', '#']).filter(|p| !p.is_empty()) {
            match Hashes::parse_pair(pair) {
                Ok((alg, digest)) => hashes.insert(alg, &digest),
                Err(e) => debug!("Ignoring fragment '{}': {}", pair, e),
            }
        }
        hashes
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn algorithms(&self) -> impl Iterator<Item = HashAlgorithm> + '_ {
        self.allowed.keys().copied()
    }

    pub fn allowed(&self, algorithm: HashAlgorithm) -> Option<&BTreeSet<String>> {
        self.allowed.get(&algorithm)
    }

    /// Union of both sets of accepted digests.
    pub fn merge(&self, other: &Hashes) -> Hashes {
        let mut merged = self.clone();
        for (alg, digests) in &other.allowed {
            merged
                .allowed
                .entry(*alg)
                .or_default()
                .extend(digests.iter().cloned());
        }
        merged
    }

    /// Incremental hasher over every requested algorithm.
    pub fn hasher(&self) -> MultiHasher {
        MultiHasher {
            digests: self
                .allowed
                .keys()
                .map(|alg| (*alg, alg.new_digest()))
                .collect(),
        }
    }

    /// Succeeds if any computed digest is one of the accepted values for its
    /// algorithm.
    pub fn check_digests(
        &self,
        got: &BTreeMap<HashAlgorithm, String>,
    ) -> std::result::Result<(), HashMismatch> {
        for (alg, actual) in got {
            if let Some(accepted) = self.allowed.get(alg) {
                if accepted.contains(&actual.to_ascii_lowercase()) {
                    debug!("{} digest verified: {}", alg, actual);
                    return Ok(());
                }
            }
        }
        Err(HashMismatch {
            allowed: self
                .allowed
                .iter()
                .map(|(alg, set)| (*alg, set.iter().cloned().collect()))
                .collect(),
            got: got.clone(),
        })
    }

    pub fn check_against_reader<R: Read>(&self, mut reader: R) -> Result<()> {
        let mut hasher = self.hasher();
        let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        self.check_digests(&hasher.finish())?;
        Ok(())
    }
}

impl FromIterator<(HashAlgorithm, String)> for Hashes {
    fn from_iter<T: IntoIterator<Item = (HashAlgorithm, String)>>(iter: T) -> Self {
        let mut hashes = Hashes::new();
        for (alg, digest) in iter {
            hashes.insert(alg, &digest);
        }
        hashes
    }
}

pub struct MultiHasher {
    digests: Vec<(HashAlgorithm, Box<dyn DynDigest + Send>)>,
}

impl MultiHasher {
    pub fn update(&mut self, chunk: &[u8]) {
        for (_, digest) in &mut self.digests {
            digest.update(chunk);
        }
    }

    pub fn finish(self) -> BTreeMap<HashAlgorithm, String> {
        self.digests
            .into_iter()
            .map(|(alg, digest)| (alg, hex::encode(digest.finalize())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const UNRELATED_SHA1: &str = "a0c6e4c6fef94b9fa5e7dd7a73a89ea0d0f59d17";

    fn sha1_of(data: &[u8]) -> String {
        let mut hasher = Hashes::from_iter([(HashAlgorithm::Sha1, String::new())]).hasher();
        hasher.update(data);
        hasher.finish()[&HashAlgorithm::Sha1].clone()
    }

    #[test]
    fn empty_hashes_request_nothing() {
        assert!(Hashes::new().is_empty());
        assert!(Hashes::from_fragment("egg=simple").is_empty());
    }

    #[test]
    fn fragment_collects_multiple_algorithms() {
        let hashes = Hashes::from_fragment("sha256=ABCDEF&md5=0123#sha1=ff");
        let algs: Vec<_> = hashes.algorithms().collect();
        assert_eq!(
            algs,
            vec![HashAlgorithm::Md5, HashAlgorithm::Sha1, HashAlgorithm::Sha256]
        );
        assert!(hashes
            .allowed(HashAlgorithm::Sha256)
            .unwrap()
            .contains("abcdef"));
    }

    #[test]
    fn matching_digest_passes_case_insensitively() {
        let digest = sha1_of(b"downloaded");
        let hashes: Hashes = [(HashAlgorithm::Sha1, digest.to_uppercase())]
            .into_iter()
            .collect();
        hashes.check_against_reader(&b"downloaded"[..]).unwrap();
    }

    #[test]
    fn any_algorithm_match_is_enough() {
        let mut hashes = Hashes::new();
        hashes.insert(HashAlgorithm::Md5, "bogus");
        hashes.insert(HashAlgorithm::Sha1, &sha1_of(b"payload"));
        hashes.check_against_reader(&b"payload"[..]).unwrap();
    }

    #[test]
    fn mismatch_reports_expected_and_actual() {
        let hashes: Hashes = [(HashAlgorithm::Sha1, UNRELATED_SHA1.to_string())]
            .into_iter()
            .collect();
        let err = hashes.check_against_reader(&b"some contents"[..]).unwrap_err();
        match err {
            SpfError::HashMismatch(mismatch) => {
                assert_eq!(
                    mismatch.allowed[&HashAlgorithm::Sha1],
                    vec![UNRELATED_SHA1.to_string()]
                );
                assert_eq!(mismatch.got[&HashAlgorithm::Sha1], sha1_of(b"some contents"));
                let message = mismatch.to_string();
                assert!(message.contains("Expected sha1"));
                assert!(message.contains("Got"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    #[case("sha256=abc", HashAlgorithm::Sha256, "abc")]
    #[case("MD5:00ff", HashAlgorithm::Md5, "00ff")]
    #[case("sha512=DEAD", HashAlgorithm::Sha512, "DEAD")]
    fn parse_pair_accepts_both_separators(
        #[case] input: &str,
        #[case] alg: HashAlgorithm,
        #[case] digest: &str,
    ) {
        assert_eq!(Hashes::parse_pair(input).unwrap(), (alg, digest.to_string()));
    }

    #[rstest]
    #[case("sha256")]
    #[case("whirlpool=abcd")]
    #[case("sha1=xyz")]
    fn parse_pair_rejects_malformed(#[case] input: &str) {
        assert!(Hashes::parse_pair(input).is_err());
    }

    #[test]
    fn merge_unions_digests() {
        let a: Hashes = [(HashAlgorithm::Sha1, "aa".to_string())].into_iter().collect();
        let b: Hashes = [
            (HashAlgorithm::Sha1, "bb".to_string()),
            (HashAlgorithm::Md5, "cc".to_string()),
        ]
        .into_iter()
        .collect();
        let merged = a.merge(&b);
        assert_eq!(merged.allowed(HashAlgorithm::Sha1).unwrap().len(), 2);
        assert!(merged.allowed(HashAlgorithm::Md5).is_some());
    }
}
