//! Digest algorithms and identifier parsing (§3).

use data_encoding::BASE32_NOPAD;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DigestFormat {
    Sha1New,
    Sha256,
    Sha256New,
}

impl DigestFormat {
    pub fn prefix(self) -> &'static str {
        match self {
            DigestFormat::Sha1New => "sha1new",
            DigestFormat::Sha256 => "sha256",
            DigestFormat::Sha256New => "sha256new",
        }
    }

    pub fn separator(self) -> char {
        match self {
            DigestFormat::Sha1New | DigestFormat::Sha256 => '=',
            DigestFormat::Sha256New => '_',
        }
    }

    /// All known formats, in `Best()` preference order (strongest first).
    pub fn ranked() -> &'static [DigestFormat] {
        &[
            DigestFormat::Sha256New,
            DigestFormat::Sha256,
            DigestFormat::Sha1New,
        ]
    }

    fn hash(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            DigestFormat::Sha1New => {
                let mut hasher = Sha1::new();
                sha1::Digest::update(&mut hasher, bytes);
                sha1::Digest::finalize(hasher).to_vec()
            }
            DigestFormat::Sha256 | DigestFormat::Sha256New => {
                let mut hasher = Sha256::new();
                Digest::update(&mut hasher, bytes);
                Digest::finalize(hasher).to_vec()
            }
        }
    }

    fn encode(self, raw: &[u8]) -> String {
        match self {
            DigestFormat::Sha1New | DigestFormat::Sha256 => hex::encode(raw),
            DigestFormat::Sha256New => BASE32_NOPAD.encode(raw),
        }
    }

    /// Compute `Prefix + Separator + encode(hash(bytes))`.
    pub fn digest_of(self, bytes: &[u8]) -> String {
        format!(
            "{}{}{}",
            self.prefix(),
            self.separator(),
            self.encode(&self.hash(bytes))
        )
    }

    /// Parse a digest identifier like `sha256new_RPUJ...` into its format and
    /// the encoded hash (without the prefix/separator).
    pub fn parse_id(id: &str) -> Option<(DigestFormat, &str)> {
        for format in Self::ranked() {
            let prefix = format.prefix();
            if let Some(rest) = id.strip_prefix(prefix) {
                if let Some(hash) = rest.strip_prefix(format.separator()) {
                    if !hash.is_empty() && format.hash_alphabet_ok(hash) {
                        return Some((*format, hash));
                    }
                }
            }
        }
        None
    }

    fn hash_alphabet_ok(self, encoded: &str) -> bool {
        match self {
            DigestFormat::Sha1New | DigestFormat::Sha256 => {
                encoded.chars().all(|c| c.is_ascii_hexdigit())
            }
            DigestFormat::Sha256New => encoded
                .chars()
                .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)),
        }
    }
}

impl fmt::Display for DigestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Pick the strongest digest identifier out of a set belonging to the same
/// implementation, per §4.6 step 4's `Best()`.
pub fn best_of(ids: &[String]) -> Option<&String> {
    for format in DigestFormat::ranked() {
        if let Some(found) = ids
            .iter()
            .find(|id| DigestFormat::parse_id(id).is_some_and(|(f, _)| f == *format))
        {
            return Some(found);
        }
    }
    None
}

/// Per-file content digest: always base16 lowercase SHA-1 for `sha1new`
/// manifests and SHA-256 otherwise, regardless of the manifest's own
/// identifier encoding (§3).
pub fn content_digest_hex(format: DigestFormat, bytes: &[u8]) -> String {
    match format {
        DigestFormat::Sha1New => {
            let mut hasher = Sha1::new();
            sha1::Digest::update(&mut hasher, bytes);
            hex::encode(sha1::Digest::finalize(hasher))
        }
        DigestFormat::Sha256 | DigestFormat::Sha256New => {
            let mut hasher = Sha256::new();
            Digest::update(&mut hasher, bytes);
            hex::encode(Digest::finalize(hasher))
        }
    }
}

pub fn content_digest_stream<R: std::io::Read>(
    format: DigestFormat,
    reader: &mut R,
) -> std::io::Result<(String, u64)> {
    let mut buf = [0u8; 64 * 1024];
    let mut size: u64 = 0;
    match format {
        DigestFormat::Sha1New => {
            let mut hasher = Sha1::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                sha1::Digest::update(&mut hasher, &buf[..n]);
                size += n as u64;
            }
            Ok((hex::encode(sha1::Digest::finalize(hasher)), size))
        }
        DigestFormat::Sha256 | DigestFormat::Sha256New => {
            let mut hasher = Sha256::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                Digest::update(&mut hasher, &buf[..n]);
                size += n as u64;
            }
            Ok((hex::encode(Digest::finalize(hasher)), size))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1new_digest_matches_known_vector() {
        // "F a9993e364706816aba3e25717850c26c9cd0d89d 1337 4 a\n" is the
        // manifest line for a single file "a" containing "data" (scenario 1
        // in §8), SHA-1'd and hex-prefixed.
        let line = "F a9993e364706816aba3e25717850c26c9cd0d89d 1337 4 a\n";
        let digest = DigestFormat::Sha1New.digest_of(line.as_bytes());
        assert_eq!(
            digest,
            "sha1new=9f2dec4538ac516218661315f68e5196803afa64"
        );
    }

    #[test]
    fn parse_id_round_trips_each_format() {
        for format in DigestFormat::ranked() {
            let digest = format.digest_of(b"hello world");
            let (parsed_format, hash) = DigestFormat::parse_id(&digest).unwrap();
            assert_eq!(parsed_format, *format);
            assert_eq!(format.digest_of(b"hello world"), format!(
                "{}{}{}",
                format.prefix(),
                format.separator(),
                hash
            ));
        }
    }

    #[test]
    fn parse_id_rejects_unknown_prefix() {
        assert!(DigestFormat::parse_id("md5=deadbeef").is_none());
    }

    #[test]
    fn best_of_prefers_sha256new_over_others() {
        let ids = vec![
            DigestFormat::Sha1New.digest_of(b"x"),
            DigestFormat::Sha256.digest_of(b"x"),
            DigestFormat::Sha256New.digest_of(b"x"),
        ];
        let best = best_of(&ids).unwrap();
        assert!(best.starts_with("sha256new_"));
    }

    #[test]
    fn content_digest_is_always_base16() {
        let d = content_digest_hex(DigestFormat::Sha256New, b"data");
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(d.len(), 64);
    }
}
