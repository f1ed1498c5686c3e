//! APK Signature Scheme v2/v3 payloads.
//!
//! Every level of the payload is a uint32-length-prefixed sequence:
//!
//! ```text
//! payload      = signers
//! signers      = lp(signer)*
//! signer (v2)  = lp(signed data) lp(signatures) lp(public key)
//! signer (v3)  = lp(signed data) u32 min sdk, u32 max sdk, lp(signatures) lp(public key)
//! signed data  = lp(digests) lp(certificates) [v3: u32 min sdk, u32 max sdk] lp(attributes)
//! certificates = lp(DER certificate)*
//! ```
//!
//! Each level is checked against its own declared length before anything inside it is read.

use tracing::debug;

use crate::cursor::ByteCursor;
use crate::error::{ApkError, Result};

/// Which signature scheme a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeVersion {
    V2,
    V3,
}

impl SchemeVersion {
    fn label(self) -> &'static str {
        match self {
            SchemeVersion::V2 => "v2",
            SchemeVersion::V3 => "v3",
        }
    }
}

/// Signature algorithm IDs used by the v2/v3 schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    RsaPssWithSha256,
    RsaPssWithSha512,
    RsaPkcs1V15WithSha256,
    RsaPkcs1V15WithSha512,
    EcdsaWithSha256,
    EcdsaWithSha512,
    DsaWithSha256,
    VerityRsaPkcs1V15WithSha256,
    VerityEcdsaWithSha256,
    VerityDsaWithSha256,
    Other(u32),
}

impl SignatureAlgorithm {
    pub fn from_u32(id: u32) -> Self {
        match id {
            0x0101 => SignatureAlgorithm::RsaPssWithSha256,
            0x0102 => SignatureAlgorithm::RsaPssWithSha512,
            0x0103 => SignatureAlgorithm::RsaPkcs1V15WithSha256,
            0x0104 => SignatureAlgorithm::RsaPkcs1V15WithSha512,
            0x0201 => SignatureAlgorithm::EcdsaWithSha256,
            0x0202 => SignatureAlgorithm::EcdsaWithSha512,
            0x0301 => SignatureAlgorithm::DsaWithSha256,
            0x0421 => SignatureAlgorithm::VerityRsaPkcs1V15WithSha256,
            0x0423 => SignatureAlgorithm::VerityEcdsaWithSha256,
            0x0425 => SignatureAlgorithm::VerityDsaWithSha256,
            other => SignatureAlgorithm::Other(other),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaPssWithSha256 => {
                "RSASSA-PSS with SHA2-256 digest, SHA2-256 MGF1, 32 bytes of salt, trailer: 0xbc"
            }
            SignatureAlgorithm::RsaPssWithSha512 => {
                "RSASSA-PSS with SHA2-512 digest, SHA2-512 MGF1, 64 bytes of salt, trailer: 0xbc"
            }
            SignatureAlgorithm::RsaPkcs1V15WithSha256 => "RSASSA-PKCS1-v1_5 with SHA2-256 digest",
            SignatureAlgorithm::RsaPkcs1V15WithSha512 => "RSASSA-PKCS1-v1_5 with SHA2-512 digest",
            SignatureAlgorithm::EcdsaWithSha256 => "ECDSA with SHA2-256 digest",
            SignatureAlgorithm::EcdsaWithSha512 => "ECDSA with SHA2-512 digest",
            SignatureAlgorithm::DsaWithSha256 => "DSA with SHA2-256 digest",
            SignatureAlgorithm::VerityRsaPkcs1V15WithSha256 => {
                "RSASSA-PKCS1-v1_5 with SHA2-256 verity digest"
            }
            SignatureAlgorithm::VerityEcdsaWithSha256 => "ECDSA with SHA2-256 verity digest",
            SignatureAlgorithm::VerityDsaWithSha256 => "DSA with SHA2-256 verity digest",
            SignatureAlgorithm::Other(_) => "unknown signature algorithm",
        }
    }
}

/// Additional attribute marking that a v2 signature must not be stripped.
pub const V2_STRIPPING_PROTECTION_ATTRIBUTE: u32 = 0xBEEF_F00D;

/// One signer of a v2 or v3 payload. All byte slices borrow from the archive.
#[derive(Debug, Clone)]
pub struct SignerRecord<'a> {
    pub scheme: SchemeVersion,
    /// DER certificates, in declared order; the first one is the signer's own.
    pub certificates: Vec<&'a [u8]>,
    pub digest_algorithms: Vec<SignatureAlgorithm>,
    pub signature_algorithms: Vec<SignatureAlgorithm>,
    /// Additional attributes of the signed data as (ID, value).
    pub attributes: Vec<(u32, &'a [u8])>,
    /// SubjectPublicKeyInfo, DER.
    pub public_key: &'a [u8],
    /// Minimum and maximum SDK version; v3 only.
    pub sdk_range: Option<(u32, u32)>,
}

impl SignerRecord<'_> {
    pub fn has_stripping_protection(&self) -> bool {
        self.attributes
            .iter()
            .any(|(id, _)| *id == V2_STRIPPING_PROTECTION_ATTRIBUTE)
    }
}

/// Walks one payload, carrying enough context to say where a bad length was found.
struct SchemeParser {
    scheme: SchemeVersion,
}

impl SchemeParser {
    fn error(&self, context: &str, msg: impl std::fmt::Display) -> ApkError {
        ApkError::signing_block(format!("{} {context}: {msg}", self.scheme.label()))
    }

    /// Read a uint32-length-prefixed field at `*position`, advancing past it.
    ///
    /// The declared length is checked against what is left of `scope` before it is used.
    fn length_prefixed<'a>(
        &self,
        scope: &ByteCursor<'a>,
        position: &mut u64,
        context: &str,
    ) -> Result<ByteCursor<'a>> {
        let remaining = scope.len().saturating_sub(*position);
        if remaining < 4 {
            return Err(self.error(
                context,
                format!("{remaining} bytes left, too few for a length prefix"),
            ));
        }
        let length = scope.read_u32_le(*position)? as u64;
        if length > remaining - 4 {
            return Err(self.error(
                context,
                format!(
                    "declared length {length} exceeds the {} bytes remaining in its scope",
                    remaining - 4
                ),
            ));
        }
        let field = scope.sub_cursor(*position + 4, length)?;
        *position += 4 + length;
        Ok(field)
    }

    fn read_u32(&self, scope: &ByteCursor<'_>, position: &mut u64, context: &str) -> Result<u32> {
        let value = scope
            .read_u32_le(*position)
            .map_err(|_| self.error(context, "truncated"))?;
        *position += 4;
        Ok(value)
    }

    /// Split a scope into length-prefixed items that fill it exactly.
    fn sequence<'a>(&self, scope: &ByteCursor<'a>, context: &str) -> Result<Vec<ByteCursor<'a>>> {
        let mut items = Vec::new();
        let mut position = 0;
        while position < scope.len() {
            let item_context = format!("{context} #{}", items.len() + 1);
            items.push(self.length_prefixed(scope, &mut position, &item_context)?);
        }
        Ok(items)
    }

    fn signers<'a>(&self, payload: &ByteCursor<'a>) -> Result<Vec<SignerRecord<'a>>> {
        let mut position = 0;
        let signers = self.length_prefixed(payload, &mut position, "signers")?;
        if position != payload.len() {
            debug!(
                scheme = self.scheme.label(),
                trailing = payload.len() - position,
                "ignoring bytes after signer sequence"
            );
        }

        let records = self
            .sequence(&signers, "signer")?
            .iter()
            .enumerate()
            .map(|(index, signer)| self.signer(signer, index + 1))
            .collect::<Result<Vec<_>>>()?;

        if records.is_empty() {
            return Err(self.error("signers", "no signers"));
        }
        Ok(records)
    }

    fn signer<'a>(&self, signer: &ByteCursor<'a>, number: usize) -> Result<SignerRecord<'a>> {
        let context = |field: &str| format!("signer #{number} {field}");
        let mut position = 0;

        let signed_data = self.length_prefixed(signer, &mut position, &context("signed data"))?;
        let sdk_range = match self.scheme {
            SchemeVersion::V2 => None,
            SchemeVersion::V3 => Some((
                self.read_u32(signer, &mut position, &context("min sdk"))?,
                self.read_u32(signer, &mut position, &context("max sdk"))?,
            )),
        };
        let signatures = self.length_prefixed(signer, &mut position, &context("signatures"))?;
        let public_key = self.length_prefixed(signer, &mut position, &context("public key"))?;

        let mut position = 0;
        let digests = self.length_prefixed(&signed_data, &mut position, &context("digests"))?;
        let certificates =
            self.length_prefixed(&signed_data, &mut position, &context("certificates"))?;
        if self.scheme == SchemeVersion::V3 {
            let min = self.read_u32(&signed_data, &mut position, &context("signed min sdk"))?;
            let max = self.read_u32(&signed_data, &mut position, &context("signed max sdk"))?;
            if Some((min, max)) != sdk_range {
                debug!(number, min, max, "signed SDK range differs from the signer's");
            }
        }
        let attributes =
            self.length_prefixed(&signed_data, &mut position, &context("attributes"))?;

        let certificates = self
            .sequence(&certificates, &context("certificate"))?
            .iter()
            .map(|certificate| certificate.as_slice())
            .collect();

        Ok(SignerRecord {
            scheme: self.scheme,
            certificates,
            digest_algorithms: self.algorithm_list(&digests, &context("digest"))?,
            signature_algorithms: self.algorithm_list(&signatures, &context("signature"))?,
            attributes: self.attributes(&attributes, &context("attribute"))?,
            public_key: public_key.as_slice(),
            sdk_range,
        })
    }

    /// Digests and signatures share a shape: lp(u32 algorithm ID, lp(bytes))*.
    fn algorithm_list(
        &self,
        scope: &ByteCursor<'_>,
        context: &str,
    ) -> Result<Vec<SignatureAlgorithm>> {
        self.sequence(scope, context)?
            .iter()
            .map(|item| {
                let mut position = 0;
                let id = self.read_u32(item, &mut position, context)?;
                self.length_prefixed(item, &mut position, context)?;
                Ok(SignatureAlgorithm::from_u32(id))
            })
            .collect()
    }

    fn attributes<'a>(
        &self,
        scope: &ByteCursor<'a>,
        context: &str,
    ) -> Result<Vec<(u32, &'a [u8])>> {
        self.sequence(scope, context)?
            .iter()
            .map(|item| {
                let id = item
                    .read_u32_le(0)
                    .map_err(|_| self.error(context, "too short for an attribute ID"))?;
                Ok((id, &item.as_slice()[4..]))
            })
            .collect()
    }
}

/// Parse the signers of a v2 or v3 payload.
///
/// # Errors
///
/// [`ApkError::MalformedSigningBlock`] if any nested length overruns its enclosing scope.
pub fn parse_signers(scheme: SchemeVersion, payload: &[u8]) -> Result<Vec<SignerRecord<'_>>> {
    SchemeParser { scheme }.signers(&ByteCursor::new(payload))
}
