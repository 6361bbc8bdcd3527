use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use crate::buf::{fill_buf, BUF_SIZE};

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unsupported digest algorithm '{0}'")]
pub struct UnknownAlgorithm(pub String);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Md5,
    Sha256,
    Sha512,
}

impl Algorithm {
    // Longest names first so manifest name matching never picks a prefix
    pub const ALL: [Algorithm; 3] = [Algorithm::Sha512, Algorithm::Sha256, Algorithm::Md5];

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Infer the algorithm from a manifest name such as `manifest-sha256.txt`.
    pub fn from_manifest_name(name: &str) -> Option<Algorithm> {
        let name = name.to_ascii_lowercase();
        Algorithm::ALL
            .iter()
            .copied()
            .find(|alg| name.contains(alg.name()))
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Algorithm::Md5),
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

enum Accumulator {
    Md5(Md5),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Accumulator {
    fn new(alg: Algorithm) -> Self {
        match alg {
            Algorithm::Md5 => Accumulator::Md5(Md5::new()),
            Algorithm::Sha256 => Accumulator::Sha256(Sha256::new()),
            Algorithm::Sha512 => Accumulator::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Accumulator::Md5(h) => h.update(data),
            Accumulator::Sha256(h) => h.update(data),
            Accumulator::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> String {
        match self {
            Accumulator::Md5(h) => hex::encode(h.finalize()),
            Accumulator::Sha256(h) => hex::encode(h.finalize()),
            Accumulator::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Fan-out digester, every byte written is fed to each requested
/// algorithm so a non-seekable stream only has to be read once.
pub struct MultiDigest {
    hashes: Vec<(Algorithm, Accumulator)>,
}

impl MultiDigest {
    pub fn new(algorithms: &[Algorithm]) -> Self {
        let mut hashes: Vec<(Algorithm, Accumulator)> = Vec::with_capacity(algorithms.len());
        for alg in algorithms {
            if !hashes.iter().any(|(a, _)| a == alg) {
                hashes.push((*alg, Accumulator::new(*alg)));
            }
        }
        MultiDigest { hashes }
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, h) in self.hashes.iter_mut() {
            h.update(data);
        }
    }

    pub fn finalize(self) -> BTreeMap<Algorithm, String> {
        self.hashes
            .into_iter()
            .map(|(alg, h)| (alg, h.finalize()))
            .collect()
    }

    /// Drain the reader through every accumulator, returns hex digests.
    pub fn digest_reader<R: Read + ?Sized>(
        mut self,
        reader: &mut R,
    ) -> std::io::Result<BTreeMap<Algorithm, String>> {
        let mut in_buf = vec![0u8; BUF_SIZE];

        loop {
            match fill_buf(reader, &mut in_buf)? {
                (true, 0) => break,
                (eof, len) => {
                    self.update(&in_buf[..len]);
                    if eof {
                        break;
                    }
                }
            }
        }
        Ok(self.finalize())
    }
}

impl Write for MultiDigest {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
