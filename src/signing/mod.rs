//! APK signature metadata: the APK Signing Block and v1 `META-INF` signature files.
//!
//! Everything here is structural. Certificates come out as raw DER bytes; checking them (and
//! the signatures that reference them) is left to a cryptographic collaborator.
//!
//! - [`block`]: finding the signing block before the central directory and splitting it into
//!   ID-value pairs
//! - [`scheme`]: walking v2/v3 payloads down to signers and their certificates
//! - [`pkcs7`]: walking a v1 signature block file down to its certificate set

pub mod block;
pub mod pkcs7;
pub mod scheme;

use std::borrow::Cow;
use std::collections::HashSet;

use tracing::warn;

use crate::error::ApkError;
use crate::zip::CentralDirectoryEntry;

pub use block::{PairId, SigningBlock, SigningBlockPair};
pub use scheme::{SchemeVersion, SignatureAlgorithm, SignerRecord};

/// Where a certificate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateSource {
    SigningBlockV2,
    SigningBlockV3,
    LegacySignatureFile,
}

/// A DER-encoded certificate, opaque to this crate.
///
/// Signing block certificates borrow from the APK buffer. Certificates of v1 signature files are
/// owned, since they come out of a decoded container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord<'a> {
    pub bytes: Cow<'a, [u8]>,
    pub source: CertificateSource,
    /// Archive member the certificate came from, for legacy signature files.
    pub origin: Option<String>,
}

/// All certificates of an APK, plus whatever went wrong while collecting them.
///
/// A failure in one source never hides the certificates of another.
#[derive(Debug, Default)]
pub struct CertificateSet<'a> {
    pub records: Vec<CertificateRecord<'a>>,
    pub issues: Vec<ApkError>,
}

impl<'a> CertificateSet<'a> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn from_source(
        &self,
        source: CertificateSource,
    ) -> impl Iterator<Item = &CertificateRecord<'a>> {
        self.records
            .iter()
            .filter(move |record| record.source == source)
    }

    /// Collect v2 then v3 certificates from a signing block, signers and certificates in
    /// declared order.
    pub(crate) fn add_signing_block(&mut self, block: &SigningBlock<'a>) {
        let schemes = [
            (
                block::SIGNATURE_SCHEME_V2_BLOCK_ID,
                SchemeVersion::V2,
                CertificateSource::SigningBlockV2,
            ),
            (
                block::SIGNATURE_SCHEME_V3_BLOCK_ID,
                SchemeVersion::V3,
                CertificateSource::SigningBlockV3,
            ),
        ];

        for (id, version, source) in schemes {
            let Some(pair) = block.find(id) else {
                continue;
            };
            match scheme::parse_signers(version, pair.value) {
                Ok(signers) => {
                    self.records.extend(signers.iter().flat_map(|signer| {
                        signer.certificates.iter().map(move |der| CertificateRecord {
                            bytes: Cow::Borrowed(*der),
                            source,
                            origin: None,
                        })
                    }));
                }
                Err(err) => {
                    warn!(%err, "skipping signature scheme payload");
                    self.issues.push(err);
                }
            }
        }
    }

    /// Collect certificates of one v1 signature block file.
    pub(crate) fn add_legacy(&mut self, name: &str, data: &[u8]) {
        match pkcs7::certificates_from_signature_block(name, data) {
            Ok(certificates) => {
                self.records
                    .extend(certificates.into_iter().map(|der| CertificateRecord {
                        bytes: Cow::Owned(der),
                        source: CertificateSource::LegacySignatureFile,
                        origin: Some(name.to_string()),
                    }));
            }
            Err(err) => self.add_issue(err),
        }
    }

    pub(crate) fn add_issue(&mut self, err: ApkError) {
        warn!(%err, "skipping signature file");
        self.issues.push(err);
    }
}

/// Extensions of v1 signature block files.
const SIGNATURE_BLOCK_EXTENSIONS: [&[u8]; 3] = [b".RSA", b".DSA", b".EC"];

const META_INF: &[u8] = b"META-INF/";

/// Whether `name` is a `META-INF/<stem>.RSA|DSA|EC` signature block file.
pub fn is_signature_block_file(name: &[u8]) -> bool {
    name.strip_prefix(META_INF).is_some_and(|rest| {
        !rest.contains(&b'/')
            && SIGNATURE_BLOCK_EXTENSIONS
                .iter()
                .any(|ext| rest.len() > ext.len() && rest.ends_with(ext))
    })
}

/// A v1 signature block file and the `.SF` file it signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V1SignatureArtifacts {
    /// `META-INF/<stem>.SF`, if the archive has it.
    pub signature_file: Option<String>,
    /// `META-INF/<stem>.RSA`, `.DSA` or `.EC`.
    pub block_file: String,
}

/// Pair every signature block file with its same-stem `.SF` file.
///
/// Names are listed once each, in order of first appearance in the central directory.
pub fn v1_signature_artifacts(entries: &[CentralDirectoryEntry<'_>]) -> Vec<V1SignatureArtifacts> {
    let names: HashSet<&[u8]> = entries.iter().map(|entry| entry.file_name).collect();

    signature_block_names(entries)
        .into_iter()
        .map(|block| {
            let stem_end = block.iter().rposition(|b| *b == b'.').unwrap_or(block.len());
            let mut sf = block[..stem_end].to_vec();
            sf.extend_from_slice(b".SF");
            let signature_file = names
                .contains(sf.as_slice())
                .then(|| String::from_utf8_lossy(&sf).into_owned());

            V1SignatureArtifacts {
                signature_file,
                block_file: String::from_utf8_lossy(block).into_owned(),
            }
        })
        .collect()
}

/// Distinct signature block file names, in order of first appearance.
pub(crate) fn signature_block_names<'a>(entries: &[CentralDirectoryEntry<'a>]) -> Vec<&'a [u8]> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .map(|entry| entry.file_name)
        .filter(|name| is_signature_block_file(name) && seen.insert(*name))
        .collect()
}
