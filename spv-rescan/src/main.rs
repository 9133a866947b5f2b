//! Command-line interface for the SPV rescan coordinator.

use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, Command};

use spv_rescan::client::{RpcAuth, RpcConfig};
use spv_rescan::{
    Config, LevelFilter, LogFileConfig, LoggingConfig, NodeChainService, ParseError, StartBound,
    Supervisor, WatchTarget,
};

fn cli() -> Command {
    Command::new("spv-rescan")
        .version(spv_rescan::VERSION)
        .about("Sync a Bitcoin SPV chain service to a target height and rescan for a script")
        .arg(
            Arg::new("persist_to_disk")
                .long("persist_to_disk")
                .help("Persist synchronized filters to the store")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("rescan")
                .long("rescan")
                .help("Perform blockchain rescan for script pubkey")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("scriptpubkey")
                .long("scriptpubkey")
                .value_name("HEX")
                .help("Hex-encoded script pubkey to scan for"),
        )
        .arg(
            Arg::new("start-height")
                .long("start-height")
                .value_name("HEIGHT")
                .help("First block of the rescan (defaults to genesis)")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("sync-height")
                .long("sync-height")
                .value_name("HEIGHT")
                .help("Height the chain must reach before rescanning")
                .value_parser(clap::value_parser!(u32))
                .default_value("81373"),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory for the store (defaults to ~/.spv-rescan/data)"),
        )
        .arg(
            Arg::new("log-dir")
                .long("log-dir")
                .value_name("DIR")
                .help("Directory for spv-rescan.log (defaults to ~/.spv-rescan)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (defaults to RUST_LOG, then info)")
                .value_parser(["error", "warn", "info", "debug", "trace"]),
        )
        .arg(
            Arg::new("rpc-url")
                .long("rpc-url")
                .value_name("URL")
                .help("Bitcoin Core RPC endpoint")
                .default_value("http://127.0.0.1:48332"),
        )
        .arg(Arg::new("rpc-user").long("rpc-user").value_name("USER").help("RPC user name"))
        .arg(
            Arg::new("rpc-password")
                .long("rpc-password")
                .value_name("PASSWORD")
                .help("RPC password"),
        )
        .arg(
            Arg::new("rpc-cookie")
                .long("rpc-cookie")
                .value_name("FILE")
                .help("RPC cookie file (takes precedence over user/password)"),
        )
        .arg(
            Arg::new("poll-interval")
                .long("poll-interval")
                .value_name("SECS")
                .help("Seconds between best block checks while syncing")
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("10"),
        )
        .arg(
            Arg::new("status-interval")
                .long("status-interval")
                .value_name("SECS")
                .help("Seconds between best block reports after sync")
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("5"),
        )
}

fn config_from_matches(matches: &ArgMatches) -> Result<Config, ParseError> {
    let mut config = Config::default()
        .with_persist_to_disk(matches.get_flag("persist_to_disk"))
        .with_sync_height(matches.get_one::<u32>("sync-height").copied().unwrap_or_default())
        .with_poll_interval(Duration::from_secs(
            matches.get_one::<u64>("poll-interval").copied().unwrap_or(10),
        ))
        .with_status_interval(Duration::from_secs(
            matches.get_one::<u64>("status-interval").copied().unwrap_or(5),
        ));

    if let Some(dir) = matches.get_one::<String>("data-dir") {
        config = config.with_data_dir(PathBuf::from(dir));
    }
    if let Some(dir) = matches.get_one::<String>("log-dir") {
        config = config.with_log_dir(PathBuf::from(dir));
    }

    let auth = match (
        matches.get_one::<String>("rpc-cookie"),
        matches.get_one::<String>("rpc-user"),
    ) {
        (Some(cookie), _) => RpcAuth::CookieFile(PathBuf::from(cookie)),
        (None, Some(user)) => RpcAuth::UserPass {
            user: user.clone(),
            password: matches.get_one::<String>("rpc-password").cloned().unwrap_or_default(),
        },
        (None, None) => RpcAuth::None,
    };
    let rpc = RpcConfig {
        url: matches
            .get_one::<String>("rpc-url")
            .cloned()
            .unwrap_or_else(|| RpcConfig::default().url),
        auth,
        ..RpcConfig::default()
    };
    config = config.with_rpc(rpc);

    if matches.get_flag("rescan") {
        let hex = matches
            .get_one::<String>("scriptpubkey")
            .ok_or_else(|| ParseError::MissingArgument("scriptpubkey".to_string()))?;
        let watch = WatchTarget::from_hex(hex)?;
        let start = match matches.get_one::<u32>("start-height") {
            Some(height) => StartBound::Height(*height),
            None => StartBound::Genesis,
        };
        config = config.with_rescan(watch, start);
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = cli().get_matches();

    let config = match config_from_matches(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Please provide a script pubkey in hex using --scriptpubkey");
            return Ok(());
        }
    };

    let level = matches
        .get_one::<String>("log-level")
        .map(|level| LevelFilter::from_str(level))
        .transpose()?;

    let _logging_guard = match spv_rescan::init_logging(LoggingConfig {
        level,
        console: true,
        file: Some(LogFileConfig::new(&config.log_dir)),
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    tracing::info!("Starting spv-rescan {}", spv_rescan::VERSION);
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Sync threshold: {}", config.sync_height);
    if let Some(rescan) = &config.rescan {
        tracing::info!("Rescan requested for script {}", rescan.watch);
    }

    let mut supervisor = Supervisor::new(config);
    match supervisor.run(NodeChainService::new).await {
        Ok(summary) => {
            tracing::info!(
                "Shut down cleanly after {} status reports (synced: {})",
                summary.status_reports,
                summary.synced.map(|b| b.to_string()).unwrap_or_else(|| "no".to_string())
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Exiting: {}", e);
            drop(_logging_guard);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, ParseError> {
        let matches = cli().try_get_matches_from(args).unwrap();
        config_from_matches(&matches)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["spv-rescan"]).unwrap();
        assert!(!config.persist_to_disk);
        assert!(config.rescan.is_none());
        assert_eq!(config.sync_height, 81373);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.status_interval, Duration::from_secs(5));
        assert_eq!(config.rpc.auth, RpcAuth::None);
    }

    #[test]
    fn test_rescan_flags() {
        let config = parse(&[
            "spv-rescan",
            "--persist_to_disk",
            "--rescan",
            "--scriptpubkey",
            "6a14000102030405060708090a0b0c0d0e0f10111213",
            "--start-height",
            "100",
        ])
        .unwrap();

        assert!(config.persist_to_disk);
        let rescan = config.rescan.unwrap();
        assert_eq!(rescan.watch.to_hex(), "6a14000102030405060708090a0b0c0d0e0f10111213");
        assert_eq!(rescan.start, StartBound::Height(100));
    }

    #[test]
    fn test_rescan_requires_scriptpubkey() {
        let err = parse(&["spv-rescan", "--rescan"]).unwrap_err();
        assert!(matches!(err, ParseError::MissingArgument(_)));

        let err = parse(&["spv-rescan", "--rescan", "--scriptpubkey", "xyz"]).unwrap_err();
        assert!(matches!(err, ParseError::InvalidHex(_, _)));
    }

    #[test]
    fn test_scriptpubkey_ignored_without_rescan() {
        let config = parse(&["spv-rescan", "--scriptpubkey", "6a"]).unwrap();
        assert!(config.rescan.is_none());
    }

    #[test]
    fn test_rpc_auth_selection() {
        let config =
            parse(&["spv-rescan", "--rpc-user", "alice", "--rpc-password", "secret"]).unwrap();
        assert_eq!(
            config.rpc.auth,
            RpcAuth::UserPass {
                user: "alice".to_string(),
                password: "secret".to_string(),
            }
        );

        let config =
            parse(&["spv-rescan", "--rpc-user", "alice", "--rpc-cookie", "/tmp/.cookie"]).unwrap();
        assert_eq!(config.rpc.auth, RpcAuth::CookieFile(PathBuf::from("/tmp/.cookie")));
    }
}
