//! Certificates from v1 (JAR) signature block files.
//!
//! `META-INF/*.RSA`, `*.DSA` and `*.EC` hold a DER `ContentInfo` wrapping PKCS #7 `SignedData`:
//!
//! ```text
//! ContentInfo ::= SEQUENCE {
//!     contentType  OBJECT IDENTIFIER (1.2.840.113549.1.7.2),
//!     content      [0] EXPLICIT SignedData }
//!
//! SignedData ::= SEQUENCE {
//!     version           INTEGER,
//!     digestAlgorithms  SET OF AlgorithmIdentifier,
//!     contentInfo       SEQUENCE,
//!     certificates      [0] IMPLICIT SET OF Certificate OPTIONAL,
//!     crls              [1] IMPLICIT ... OPTIONAL,
//!     signerInfos       SET OF SignerInfo }
//! ```
//!
//! Decoding is strict DER. Certificates are kept as opaque elements and handed back byte for
//! byte; nothing is verified.

use rasn::types::{Any, Integer, Oid, SequenceOf};
use rasn::{AsnType, Decode, Decoder};
use rasn_cms::ContentInfo;
use tracing::debug;

use crate::error::{ApkError, Result};

const OID_PKCS7_SIGNED_DATA: &Oid = Oid::ISO_MEMBER_BODY_US_RSADSI_PKCS7_SIGNED_DATA;

/// DER identifier octet of a universal constructed SEQUENCE, the only certificate choice
/// accepted.
const TAG_SEQUENCE: u8 = 0x30;

/// `SignedData` with everything but the certificate set left as undecoded elements.
///
/// The certificate set is read as a list of raw elements so that declared order survives and no
/// X.509 structure is imposed on the certificates themselves.
#[derive(AsnType, Decode, Debug)]
#[allow(dead_code)]
struct SignedDataCertificates {
    version: Integer,
    digest_algorithms: Any,
    encap_content_info: Any,
    #[rasn(tag(0))]
    certificates: Option<SequenceOf<Any>>,
    #[rasn(tag(1))]
    crls: Option<SequenceOf<Any>>,
    signer_infos: Any,
}

/// Extract the raw DER certificates from a v1 signature block file.
///
/// `name` is only used for error context.
///
/// # Errors
///
/// [`ApkError::UnsupportedSignatureFormat`] when the file is not DER `SignedData`, including
/// truncation and indefinite lengths, or when the certificate set holds anything other than
/// X.509 certificates.
pub fn certificates_from_signature_block(name: &str, data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let unsupported = |reason: String| ApkError::UnsupportedSignatureFormat {
        name: name.to_string(),
        reason,
    };

    let content_info = rasn::der::decode::<ContentInfo>(data)
        .map_err(|err| unsupported(format!("cannot decode ContentInfo: {err}")))?;
    if &*content_info.content_type != OID_PKCS7_SIGNED_DATA {
        return Err(unsupported(format!(
            "content type {:?} is not pkcs7-signedData",
            content_info.content_type
        )));
    }

    let signed_data =
        rasn::der::decode::<SignedDataCertificates>(content_info.content.as_bytes())
            .map_err(|err| unsupported(format!("cannot decode SignedData: {err}")))?;

    let Some(certificates) = signed_data.certificates else {
        debug!(name, "signature block carries no certificate set");
        return Ok(Vec::new());
    };

    certificates
        .into_iter()
        .enumerate()
        .map(|(index, certificate)| {
            let bytes = certificate.into_bytes();
            match bytes.first() {
                Some(&TAG_SEQUENCE) => Ok(bytes),
                tag => Err(unsupported(format!(
                    "certificate choice {index} with tag {tag:02x?} is not an X.509 certificate"
                ))),
            }
        })
        .collect()
}
