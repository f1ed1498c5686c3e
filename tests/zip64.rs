mod common;

use apkparse::{Apk, ApkError};
use common::{ApkBuilder, Zip64Extra};

fn zip64_apk(extra: Zip64Extra) -> Vec<u8> {
    ApkBuilder::new()
        .stored("a.txt", b"hello")
        .deflated("res/values/strings.xml", b"<resources/>")
        .zip64(extra)
        .build()
}

fn assert_malformed_zip64(result: apkparse::Result<Apk<'_>>) {
    match result {
        Err(ApkError::MalformedArchive(message)) => {
            assert!(message.contains("ZIP64"), "{message}");
        }
        Err(other) => panic!("expected MalformedArchive, got {other:?}"),
        Ok(_) => panic!("expected MalformedArchive, got an archive"),
    }
}

#[test]
fn saturated_fields_resolve_through_zip64_records() {
    let data = zip64_apk(Zip64Extra::Full);

    let apk = Apk::open(&data).unwrap();
    let eocd = apk.end_of_central_directory();
    assert!(eocd.zip64);
    assert_eq!(eocd.entry_count, 2);

    let entry = apk.find(b"a.txt").unwrap();
    assert_eq!(entry.local_header_offset, 0);
    assert_eq!(entry.compressed_size, 5);
    assert_eq!(entry.uncompressed_size, 5);

    assert_eq!(&*apk.read("a.txt").unwrap(), b"hello");
    assert_eq!(&*apk.read("res/values/strings.xml").unwrap(), b"<resources/>");
}

#[test]
fn saturated_entry_without_extra_field_is_malformed() {
    let data = zip64_apk(Zip64Extra::Missing);
    assert_malformed_zip64(Apk::open(&data));
}

#[test]
fn extra_field_too_short_for_saturated_offset_is_malformed() {
    let data = zip64_apk(Zip64Extra::SizesOnly);
    assert_malformed_zip64(Apk::open(&data));
}

#[test]
fn locator_pointing_past_itself_is_malformed() {
    let mut data = zip64_apk(Zip64Extra::Full);
    // No comment: the locator sits right before the 22-byte end record.
    let locator = data.len() - 22 - 20;
    assert_eq!(&data[locator..locator + 4], b"PK\x06\x07");

    let past_locator = locator as u64 + 4;
    data[locator + 8..locator + 16].copy_from_slice(&past_locator.to_le_bytes());
    assert_malformed_zip64(Apk::open(&data));
}

#[test]
fn missing_locator_is_malformed() {
    let mut data = zip64_apk(Zip64Extra::Full);
    let locator = data.len() - 22 - 20;
    data[locator..locator + 4].copy_from_slice(b"PK\x00\x00");
    assert_malformed_zip64(Apk::open(&data));
}
