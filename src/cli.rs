//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None
)]
pub struct Cli {
    /// Enable verbose logging. Can be specified multiple times to
    /// increase verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Redirect the log sink to this file instead of standard error.
    /// Truncated on open; rotation is not implemented.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Load handler configuration from this file.
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Detach from the controlling terminal after initialization.
    #[arg(short = 'd', long = "daemonize")]
    pub daemonize: bool,

    /// Path of the advisory single-instance lock file.
    #[arg(long = "lock-file", default_value = "/var/run/usb_monitor.pid")]
    pub lock_file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_config_flag() {
        let cli = Cli::try_parse_from(["usb-monitor", "-c", "handlers.yaml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("handlers.yaml"));
        assert!(!cli.daemonize);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn missing_config_flag_is_rejected() {
        assert!(Cli::try_parse_from(["usb-monitor"]).is_err());
    }

    #[test]
    fn verbosity_counts_repeated_flags() {
        let cli = Cli::try_parse_from(["usb-monitor", "-c", "h.yaml", "-vvv"]).unwrap();
        assert_eq!(cli.verbose, 3);
    }

    #[test]
    fn accepts_daemonize_and_output_flags() {
        let cli = Cli::try_parse_from(["usb-monitor", "-c", "h.yaml", "-d", "-o", "/tmp/out.log"]).unwrap();
        assert!(cli.daemonize);
        assert_eq!(cli.output, Some(PathBuf::from("/tmp/out.log")));
    }
}
