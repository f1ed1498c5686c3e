//! Main entry point for the apkparse CLI application.
//!
//! Loads an APK from the local filesystem or an HTTP URL and prints its
//! structure, member contents or certificates.

use anyhow::{Context, Result};
use clap::Parser;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use apkparse::signing::SchemeVersion;
use apkparse::{Apk, Cli, ExtractOptions, HttpRangeReader, LocalFileReader, io};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let data = if cli.is_http_url() {
        let reader = HttpRangeReader::new(cli.file.clone()).await?;
        let data = io::read_fully(&reader).await?;
        if !cli.is_quiet() {
            eprintln!("Total bytes transferred: {}", format_size(reader.transferred_bytes()));
        }
        data
    } else {
        let reader = LocalFileReader::new(Path::new(&cli.file))?;
        io::read_fully(&reader).await?
    };

    let options = ExtractOptions::default().with_verify_crc(!cli.lenient);
    let apk = Apk::open_with(&data, options).with_context(|| format!("cannot parse {}", cli.file))?;

    process_apk(&apk, &cli)
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("apkparse={}", cli.log_level())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn process_apk(apk: &Apk<'_>, cli: &Cli) -> Result<()> {
    if cli.writes_binary() {
        return write_members(apk, cli);
    }

    if !cli.is_quiet() {
        println!("{}", apk.display_name());
    }

    if cli.certs {
        print_certificates(apk);
        if !cli.list && !cli.verbose {
            return Ok(());
        }
    }

    list_files(apk, cli.verbose);
    Ok(())
}

/// Stream `-p` members and the manifest to stdout, byte for byte.
fn write_members(apk: &Apk<'_>, cli: &Cli) -> Result<()> {
    let mut stdout = std::io::stdout().lock();

    let extract = |path: &str| {
        if cli.lenient {
            apk.extract_lenient(path.as_bytes())
        } else {
            apk.read(path)
        }
    };

    if cli.manifest {
        let manifest = extract(apkparse::ANDROID_MANIFEST)?;
        stdout.write_all(&manifest)?;
    }

    for path in &cli.pipe {
        let data = extract(path.as_str()).with_context(|| format!("cannot extract {path}"))?;
        stdout.write_all(&data)?;
    }

    stdout.flush()?;
    Ok(())
}

fn print_certificates(apk: &Apk<'_>) {
    let certificates = apk.certificates();

    println!(
        "Signature schemes: v1={} v2={} v3={}",
        apk.is_signed_v1(),
        apk.is_signed_v2(),
        apk.is_signed_v3()
    );

    for version in [SchemeVersion::V2, SchemeVersion::V3] {
        // Parse failures are already listed with the certificate issues below.
        let Ok(signers) = apk.signers(version) else {
            continue;
        };
        for signer in signers {
            let algorithms: Vec<&str> = signer
                .signature_algorithms
                .iter()
                .map(|algorithm| algorithm.description())
                .collect();
            print!("{version:?} signer: {}", algorithms.join(", "));
            if let Some((min, max)) = signer.sdk_range {
                print!(" (SDK {min}..={max})");
            }
            println!();
        }
    }

    for (index, record) in certificates.records.iter().enumerate() {
        let fingerprint = Sha256::digest(&*record.bytes)
            .iter()
            .map(|b| hex::encode_upper([*b]))
            .collect::<Vec<_>>()
            .join(":");
        println!(
            "#{index} {:?}{} {} bytes\n   SHA-256: {fingerprint}",
            record.source,
            record
                .origin
                .as_deref()
                .map(|origin| format!(" ({origin})"))
                .unwrap_or_default(),
            record.bytes.len()
        );
    }

    for issue in &certificates.issues {
        println!("warning: {issue}");
    }
}

/// List entries in the archive.
///
/// - Simple format (`-l`): Just entry names, one per line
/// - Verbose format (`-v`): Table with sizes, compression ratio, and timestamps
fn list_files(apk: &Apk<'_>, verbose: bool) {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in apk.entries() {
        let name = entry.name_lossy();
        if !verbose {
            println!("{name}");
            continue;
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            name
        );

        if !entry.is_directory() {
            // Sizes come from the archive and may be anything up to u64::MAX.
            total_uncompressed = total_uncompressed.saturating_add(entry.uncompressed_size);
            total_compressed = total_compressed.saturating_add(entry.compressed_size);
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }
}

/// Space saved by compression, as a right-aligned percentage.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        let kept = compressed as u128 * 100 / uncompressed as u128;
        format!("{:>4}%", 100 - kept)
    } else {
        "  0%".to_string()
    }
}

fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{size} bytes")
    }
}
