use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "apkparse")]
#[command(version)]
#[command(about = "Inspect the ZIP structure and signatures of an APK", long_about = None)]
#[command(after_help = "Examples:\n  \
  apkparse app.apk -v                       list entries with sizes and dates\n  \
  apkparse app.apk -p classes.dex > c.dex   extract one member to stdout\n  \
  apkparse --certs https://example.com/app.apk   certificates of a remote APK")]
pub struct Cli {
    /// APK file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// List entry names
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely and log parsing details
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract the named members to stdout
    #[arg(short = 'p', value_name = "PATH", num_args = 1..)]
    pub pipe: Vec<String>,

    /// Write the binary AndroidManifest.xml to stdout
    #[arg(long)]
    pub manifest: bool,

    /// Print a summary of every certificate
    #[arg(long)]
    pub certs: bool,

    /// Keep members whose CRC-32 does not match, with a warning
    #[arg(long)]
    pub lenient: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    /// Whether stdout carries raw member bytes.
    pub fn writes_binary(&self) -> bool {
        !self.pipe.is_empty() || self.manifest
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.writes_binary()
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (0, true) => "debug",
            (0, false) => "warn",
            (1, _) => "error",
            _ => "off",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paths_and_flags() {
        let cli = Cli::parse_from(["apkparse", "app.apk", "-p", "classes.dex", "res/a.xml"]);
        assert_eq!(cli.pipe, vec!["classes.dex", "res/a.xml"]);
        assert!(cli.writes_binary());
        assert!(cli.is_quiet());
        assert!(!cli.is_http_url());
    }

    #[test]
    fn log_level_follows_verbosity() {
        assert_eq!(Cli::parse_from(["apkparse", "a.apk"]).log_level(), "warn");
        assert_eq!(Cli::parse_from(["apkparse", "-v", "a.apk"]).log_level(), "debug");
        assert_eq!(Cli::parse_from(["apkparse", "-q", "a.apk"]).log_level(), "error");
        assert_eq!(Cli::parse_from(["apkparse", "-qq", "a.apk"]).log_level(), "off");
    }

    #[test]
    fn recognises_urls() {
        let cli = Cli::parse_from(["apkparse", "--certs", "https://example.com/app.apk"]);
        assert!(cli.is_http_url());
        assert!(cli.certs);
    }
}
