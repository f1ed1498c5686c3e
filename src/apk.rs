//! The parsed view of one APK.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{ApkError, Result};
use crate::signing::{
    self, CertificateSet, SchemeVersion, SignerRecord, SigningBlock, SigningBlockPair,
    V1SignatureArtifacts, block, scheme,
};
use crate::zip::{
    CentralDirectoryEntry, EndOfCentralDirectory, ExtractOptions, ZipExtractor, ZipParser,
    find_by_path,
};

/// Path of the binary manifest inside every APK.
pub const ANDROID_MANIFEST: &str = "AndroidManifest.xml";

/// An APK parsed from a caller-owned buffer.
///
/// Built once by [`Apk::open`] and never modified afterwards; extraction only reads. All
/// entries and signing block pairs borrow from the buffer. Certificates are collected the first
/// time [`Apk::certificates`] is called.
pub struct Apk<'a> {
    data: &'a [u8],
    eocd: EndOfCentralDirectory<'a>,
    entries: Vec<CentralDirectoryEntry<'a>>,
    signing_block: Option<SigningBlock<'a>>,
    extractor: ZipExtractor<'a>,
    certificates: OnceLock<CertificateSet<'a>>,
}

impl<'a> Apk<'a> {
    /// Parse the directory structure and signing block of `data`.
    ///
    /// # Errors
    ///
    /// [`ApkError::MalformedArchive`] or [`ApkError::MalformedSigningBlock`] when the index of
    /// the archive cannot be trusted. No partial model is returned.
    pub fn open(data: &'a [u8]) -> Result<Self> {
        Self::open_with(data, ExtractOptions::default())
    }

    pub fn open_with(data: &'a [u8], options: ExtractOptions) -> Result<Self> {
        let parser = ZipParser::new(data);
        let eocd = parser.find_eocd()?;
        let entries = parser.list_entries(&eocd)?;
        let signing_block = block::locate_signing_block(parser.cursor(), eocd.cd_offset)?;

        debug!(
            entries = entries.len(),
            signing_block = signing_block.is_some(),
            "opened APK"
        );

        Ok(Self {
            data,
            eocd,
            entries,
            signing_block,
            extractor: ZipExtractor::new(data, options),
            certificates: OnceLock::new(),
        })
    }

    /// The raw archive bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn end_of_central_directory(&self) -> &EndOfCentralDirectory<'a> {
        &self.eocd
    }

    /// Every central directory entry in on-disk order, duplicates included.
    pub fn entries(&self) -> &[CentralDirectoryEntry<'a>] {
        &self.entries
    }

    /// Entry names in central directory order, with invalid UTF-8 replaced.
    pub fn file_names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name_lossy()).collect()
    }

    /// The entry for `path`; the last one wins when names repeat.
    pub fn find(&self, path: &[u8]) -> Result<&CentralDirectoryEntry<'a>> {
        find_by_path(&self.entries, path)
            .ok_or_else(|| ApkError::EntryNotFound(String::from_utf8_lossy(path).into_owned()))
    }

    /// Extract a member by its exact name.
    ///
    /// Names are compared as bytes and never treated as filesystem paths; sanitising them
    /// before writing anything to disk is up to the caller.
    pub fn extract(&self, path: &[u8]) -> Result<Cow<'a, [u8]>> {
        let entry = self.find(path)?;
        self.extractor.extract(entry)
    }

    /// Extract a member, keeping the bytes when only the CRC-32 check fails.
    pub fn extract_lenient(&self, path: &[u8]) -> Result<Cow<'a, [u8]>> {
        match self.extract(path) {
            Err(err @ ApkError::IntegrityMismatch { .. }) => {
                warn!(%err, "accepting entry despite CRC-32 mismatch");
                err.into_unverified_bytes().map(Cow::Owned)
            }
            other => other,
        }
    }

    /// Extract a member by UTF-8 path.
    pub fn read(&self, path: &str) -> Result<Cow<'a, [u8]>> {
        self.extract(path.as_bytes())
    }

    /// The still-binary `AndroidManifest.xml`, for a binary XML decoder.
    pub fn manifest_bytes(&self) -> Result<Cow<'a, [u8]>> {
        self.read(ANDROID_MANIFEST)
    }

    pub fn signing_block(&self) -> Option<&SigningBlock<'a>> {
        self.signing_block.as_ref()
    }

    /// The signing block's ID-value pairs, if the APK has a block.
    pub fn signing_block_pairs(&self) -> Option<&[SigningBlockPair<'a>]> {
        self.signing_block.as_ref().map(|block| block.pairs.as_slice())
    }

    /// Signers of a v2 or v3 scheme payload; empty when the block has no such pair.
    pub fn signers(&self, version: SchemeVersion) -> Result<Vec<SignerRecord<'a>>> {
        let id = match version {
            SchemeVersion::V2 => block::SIGNATURE_SCHEME_V2_BLOCK_ID,
            SchemeVersion::V3 => block::SIGNATURE_SCHEME_V3_BLOCK_ID,
        };
        match self.signing_block.as_ref().and_then(|block| block.find(id)) {
            Some(pair) => scheme::parse_signers(version, pair.value),
            None => Ok(Vec::new()),
        }
    }

    /// Certificates from the signing block (v2, then v3) and from v1 signature block files.
    ///
    /// Computed on first use. Sources that fail to parse are listed in
    /// [`CertificateSet::issues`] and do not affect the others.
    pub fn certificates(&self) -> &CertificateSet<'a> {
        self.certificates.get_or_init(|| self.collect_certificates())
    }

    fn collect_certificates(&self) -> CertificateSet<'a> {
        let mut set = CertificateSet::default();

        if let Some(block) = &self.signing_block {
            set.add_signing_block(block);
        }

        for name in signing::signature_block_names(&self.entries) {
            let display = String::from_utf8_lossy(name).into_owned();
            match self.extract(name) {
                Ok(data) => set.add_legacy(&display, &data),
                Err(err) => set.add_issue(err),
            }
        }

        debug!(
            certificates = set.records.len(),
            issues = set.issues.len(),
            "collected certificates"
        );
        set
    }

    /// Every `META-INF` signature block file with its `.SF` file.
    pub fn v1_signature_artifacts(&self) -> Vec<V1SignatureArtifacts> {
        signing::v1_signature_artifacts(&self.entries)
    }

    pub fn is_signed_v1(&self) -> bool {
        !signing::signature_block_names(&self.entries).is_empty()
    }

    pub fn is_signed_v2(&self) -> bool {
        self.signing_block
            .as_ref()
            .is_some_and(|block| block.has(block::SIGNATURE_SCHEME_V2_BLOCK_ID))
    }

    pub fn is_signed_v3(&self) -> bool {
        self.signing_block
            .as_ref()
            .is_some_and(|block| block.has(block::SIGNATURE_SCHEME_V3_BLOCK_ID))
    }

    /// Root-level `classes.dex`, `classes2.dex`, ... in central directory order.
    pub fn dex_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|entry| is_dex_name(entry.file_name) && seen.insert(entry.file_name))
            .map(|entry| entry.name_lossy())
            .collect()
    }

    /// The main `classes.dex`.
    pub fn dex(&self) -> Result<Cow<'a, [u8]>> {
        self.read("classes.dex")
    }

    /// Every dex file, in the order of [`Apk::dex_names`].
    pub fn all_dex(&self) -> impl Iterator<Item = (String, Result<Cow<'a, [u8]>>)> + '_ {
        self.dex_names().into_iter().map(move |name| {
            let data = self.read(&name);
            (name, data)
        })
    }

    pub fn is_multidex(&self) -> bool {
        self.dex_names().len() > 1
    }

    /// Computed CRC-32 of every member that can be extracted.
    ///
    /// Disagreements with the central directory are logged, not fatal. Members that cannot be
    /// extracted at all are skipped.
    pub fn files_crc32(&self) -> BTreeMap<String, u32> {
        // Later entries replace earlier ones with the same name.
        let latest: HashMap<&[u8], &CentralDirectoryEntry<'a>> = self
            .entries
            .iter()
            .map(|entry| (entry.file_name, entry))
            .collect();

        let mut crcs = BTreeMap::new();
        for entry in &self.entries {
            let name = entry.name_lossy();
            if crcs.contains_key(&name) {
                continue;
            }
            let Some(&latest) = latest.get(entry.file_name) else {
                continue;
            };
            let computed = match self.extractor.extract(latest) {
                Ok(data) => crc32fast::hash(&data),
                Err(ApkError::IntegrityMismatch {
                    declared, computed, ..
                }) => {
                    warn!(
                        %name,
                        "file has different CRC32 after unpacking! declared: {declared:08x}, calculated: {computed:08x}"
                    );
                    computed
                }
                Err(err) => {
                    warn!(%name, %err, "cannot compute CRC-32");
                    continue;
                }
            };
            crcs.insert(name, computed);
        }
        crcs
    }

    /// SHA-256 of the whole archive, hex encoded.
    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(self.data))
    }

    /// A stable name for the APK when it came from memory.
    pub fn display_name(&self) -> String {
        format!("raw_apk_sha256:{}", self.sha256())
    }
}

/// `classes.dex` or `classes<N>.dex` at the archive root.
fn is_dex_name(name: &[u8]) -> bool {
    name.strip_prefix(b"classes")
        .and_then(|rest| rest.strip_suffix(b".dex"))
        .is_some_and(|number| number.iter().all(u8::is_ascii_digit))
}
