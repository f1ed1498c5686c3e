//! Builders for APK images used by the integration tests.
//!
//! Each test binary only uses part of this module.
#![allow(dead_code)]

use std::io::Write;

use flate2::Compression;
use flate2::write::DeflateEncoder;

pub const SIGNATURE_SCHEME_V2_BLOCK_ID: u32 = 0x7109_871A;
pub const SIGNATURE_SCHEME_V3_BLOCK_ID: u32 = 0xF053_68C0;
pub const VERITY_PADDING_BLOCK_ID: u32 = 0x4272_6577;

/// 1980-01-01 in MS-DOS date format.
const DOS_DATE: u16 = 0x0021;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

/// One archive member as it will be written.
#[derive(Clone)]
pub struct Member {
    pub name: Vec<u8>,
    pub method: u16,
    pub payload: Vec<u8>,
    pub crc32: u32,
    pub uncompressed_size: u32,
}

impl Member {
    pub fn stored(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
            method: METHOD_STORED,
            payload: data.to_vec(),
            crc32: crc32fast::hash(data),
            uncompressed_size: data.len() as u32,
        }
    }

    pub fn deflated(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
            method: METHOD_DEFLATED,
            payload: deflate(data),
            crc32: crc32fast::hash(data),
            uncompressed_size: data.len() as u32,
        }
    }

    /// Declare a different CRC-32 in both headers.
    pub fn with_crc32(mut self, crc32: u32) -> Self {
        self.crc32 = crc32;
        self
    }

    /// Declare a different uncompressed size in both headers.
    pub fn with_uncompressed_size(mut self, size: u32) -> Self {
        self.uncompressed_size = size;
        self
    }
}

/// What the central directory records of a ZIP64 archive carry in their 0x0001 extra field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Zip64Extra {
    /// Uncompressed size, compressed size and local header offset.
    Full,
    /// No extra field at all, despite the saturated header fields.
    Missing,
    /// Only the two sizes, leaving the saturated offset unaccounted for.
    SizesOnly,
}

/// Writes local headers, an optional APK Signing Block, the central directory and the end
/// record, in that order.
#[derive(Default)]
pub struct ApkBuilder {
    members: Vec<Member>,
    signing_block: Option<Vec<u8>>,
    comment: Vec<u8>,
    trailing: Vec<u8>,
    zip64: Option<Zip64Extra>,
}

impl ApkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.member(Member::stored(name, data))
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.member(Member::deflated(name, data))
    }

    /// Bytes placed verbatim between the last member and the central directory.
    pub fn signing_block(mut self, block: Vec<u8>) -> Self {
        self.signing_block = Some(block);
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Bytes after the end record, outside any ZIP structure.
    pub fn trailing(mut self, trailing: &[u8]) -> Self {
        self.trailing = trailing.to_vec();
        self
    }

    /// Write saturated sizes and offsets, resolved through ZIP64 extra fields and a ZIP64 end
    /// of central directory record with its locator.
    pub fn zip64(mut self, extra: Zip64Extra) -> Self {
        self.zip64 = Some(extra);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut offsets = Vec::with_capacity(self.members.len());

        for member in &self.members {
            offsets.push(out.len() as u32);
            out.extend_from_slice(b"PK\x03\x04");
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&member.method.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&DOS_DATE.to_le_bytes());
            out.extend_from_slice(&member.crc32.to_le_bytes());
            if self.zip64.is_some() {
                out.extend_from_slice(&u32::MAX.to_le_bytes());
                out.extend_from_slice(&u32::MAX.to_le_bytes());
                out.extend_from_slice(&(member.name.len() as u16).to_le_bytes());
                out.extend_from_slice(&20u16.to_le_bytes());
                out.extend_from_slice(&member.name);
                out.extend(zip64_extra(&[
                    member.uncompressed_size as u64,
                    member.payload.len() as u64,
                ]));
            } else {
                out.extend_from_slice(&(member.payload.len() as u32).to_le_bytes());
                out.extend_from_slice(&member.uncompressed_size.to_le_bytes());
                out.extend_from_slice(&(member.name.len() as u16).to_le_bytes());
                out.extend_from_slice(&0u16.to_le_bytes());
                out.extend_from_slice(&member.name);
            }
            out.extend_from_slice(&member.payload);
        }

        if let Some(block) = &self.signing_block {
            out.extend_from_slice(block);
        }

        let cd_offset = out.len() as u32;
        for (member, offset) in self.members.iter().zip(offsets) {
            let (compressed, uncompressed, local_offset, extra) = match self.zip64 {
                None => (
                    member.payload.len() as u32,
                    member.uncompressed_size,
                    offset,
                    Vec::new(),
                ),
                Some(mode) => {
                    let mut values =
                        vec![member.uncompressed_size as u64, member.payload.len() as u64];
                    if mode == Zip64Extra::Full {
                        values.push(offset as u64);
                    }
                    let extra = match mode {
                        Zip64Extra::Missing => Vec::new(),
                        _ => zip64_extra(&values),
                    };
                    (u32::MAX, u32::MAX, u32::MAX, extra)
                }
            };

            out.extend_from_slice(b"PK\x01\x02");
            out.extend_from_slice(&45u16.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&member.method.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&DOS_DATE.to_le_bytes());
            out.extend_from_slice(&member.crc32.to_le_bytes());
            out.extend_from_slice(&compressed.to_le_bytes());
            out.extend_from_slice(&uncompressed.to_le_bytes());
            out.extend_from_slice(&(member.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // comment
            out.extend_from_slice(&0u16.to_le_bytes()); // disk
            out.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
            out.extend_from_slice(&0u32.to_le_bytes()); // external attributes
            out.extend_from_slice(&local_offset.to_le_bytes());
            out.extend_from_slice(&member.name);
            out.extend_from_slice(&extra);
        }
        let cd_size = out.len() as u32 - cd_offset;
        let count = self.members.len() as u16;

        let (count, cd_size, cd_offset) = if self.zip64.is_some() {
            let eocd64_offset = out.len() as u64;
            out.extend_from_slice(b"PK\x06\x06");
            out.extend_from_slice(&44u64.to_le_bytes());
            out.extend_from_slice(&45u16.to_le_bytes());
            out.extend_from_slice(&45u16.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&(count as u64).to_le_bytes());
            out.extend_from_slice(&(count as u64).to_le_bytes());
            out.extend_from_slice(&(cd_size as u64).to_le_bytes());
            out.extend_from_slice(&(cd_offset as u64).to_le_bytes());

            out.extend_from_slice(b"PK\x06\x07");
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&eocd64_offset.to_le_bytes());
            out.extend_from_slice(&1u32.to_le_bytes());
            (u16::MAX, u32::MAX, u32::MAX)
        } else {
            (count, cd_size, cd_offset)
        };

        out.extend_from_slice(b"PK\x05\x06");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out.extend_from_slice(&self.trailing);
        out
    }
}

/// A ZIP64 extended information extra field (ID 0x0001) holding `values` in order.
fn zip64_extra(values: &[u64]) -> Vec<u8> {
    let mut out = 0x0001u16.to_le_bytes().to_vec();
    out.extend_from_slice(&(values.len() as u16 * 8).to_le_bytes());
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// An APK Signing Block holding `pairs`, with matching header and footer sizes.
pub fn signing_block(pairs: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (id, value) in pairs {
        body.extend_from_slice(&(value.len() as u64 + 4).to_le_bytes());
        body.extend_from_slice(&id.to_le_bytes());
        body.extend_from_slice(value);
    }
    let size = body.len() as u64 + 24;

    let mut block = size.to_le_bytes().to_vec();
    block.extend(body);
    block.extend_from_slice(&size.to_le_bytes());
    block.extend_from_slice(b"APK Sig Block 42");
    block
}

/// uint32 length prefix.
pub fn lp(data: &[u8]) -> Vec<u8> {
    let mut out = (data.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(data);
    out
}

/// A length-prefixed sequence of length-prefixed items.
pub fn seq(items: &[Vec<u8>]) -> Vec<u8> {
    lp(&items.iter().flat_map(|item| lp(item)).collect::<Vec<_>>())
}

fn algorithm_entry(id: u32, bytes: &[u8]) -> Vec<u8> {
    let mut out = id.to_le_bytes().to_vec();
    out.extend(lp(bytes));
    out
}

fn signer(certificates: &[&[u8]], sdk: Option<(u32, u32)>) -> Vec<u8> {
    let mut signed_data = seq(&[algorithm_entry(0x0103, &[0x11; 32])]);
    signed_data.extend(seq(&certificates.iter().map(|c| c.to_vec()).collect::<Vec<_>>()));
    if let Some((min, max)) = sdk {
        signed_data.extend_from_slice(&min.to_le_bytes());
        signed_data.extend_from_slice(&max.to_le_bytes());
    }
    signed_data.extend(seq(&[]));

    let mut out = lp(&signed_data);
    if let Some((min, max)) = sdk {
        out.extend_from_slice(&min.to_le_bytes());
        out.extend_from_slice(&max.to_le_bytes());
    }
    out.extend(seq(&[algorithm_entry(0x0103, &[0x22; 64])]));
    out.extend(lp(b"subject public key info"));
    out
}

/// A v2 scheme payload with one signer per certificate chain.
pub fn v2_payload(signers: &[&[&[u8]]]) -> Vec<u8> {
    seq(&signers.iter().map(|certs| signer(certs, None)).collect::<Vec<_>>())
}

/// A v3 scheme payload with one signer per certificate chain, all for SDK 28 and up.
pub fn v3_payload(signers: &[&[&[u8]]]) -> Vec<u8> {
    seq(&signers
        .iter()
        .map(|certs| signer(certs, Some((28, 0x7FFF_FFFF))))
        .collect::<Vec<_>>())
}

/// DER tag-length-value with definite length.
pub fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.extend_from_slice(&[0x81, len as u8]);
    } else {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(content);
    out
}

/// A stand-in X.509 certificate: a SEQUENCE the parser treats as opaque.
pub fn fake_certificate(marker: u8) -> Vec<u8> {
    der(0x30, &der(0x30, &[marker; 200]))
}

/// DER contents of OID 2.16.840.1.101.3.4.2.1 (SHA-256).
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
/// DER contents of OID 1.2.840.113549.1.7.1 (pkcs7-data).
const OID_PKCS7_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x01];

/// A PKCS #7 SignedData signature block file carrying `certificates`.
pub fn pkcs7_signature_block(certificates: &[Vec<u8>]) -> Vec<u8> {
    let mut signed = der(0x02, &[1]);
    signed.extend(der(0x31, &der(0x30, &der(0x06, OID_SHA256))));
    signed.extend(der(0x30, &der(0x06, OID_PKCS7_DATA)));
    signed.extend(der(0xA0, &certificates.concat()));
    signed.extend(der(0x31, &der(0x30, &der(0x02, &[1]))));

    let mut info = der(0x06, &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02]);
    info.extend(der(0xA0, &der(0x30, &signed)));
    der(0x30, &info)
}
