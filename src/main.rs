use std::{path::PathBuf, process, sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use radscan_rs::{JsonPatientRecords, ScanClient, ScanClientConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Patient code (UHID) the scan is requested for
    #[clap(short = 'p', long)]
    uhid: String,
    /// Scan modality (CT, MR, XRAY, US, PET, ...)
    #[clap(short, long)]
    modality: String,
    /// Body part to scan (e.g. BRAIN, CHEST)
    #[clap(short, long)]
    region: String,
    /// JSON file mapping patient codes to internal ids
    #[clap(short = 'P', long, default_value = "patients.json")]
    patients: PathBuf,
    /// Link ledger, defaults to links.jsonl in the upload directory
    #[clap(long)]
    ledger: Option<PathBuf>,
    /// Override the referring department from the environment variable
    #[clap(short, long)]
    department: Option<String>,
    /// Override the API URL from the environment variable
    #[clap(short, long)]
    api_url: Option<String>,
    /// Override the upload directory from the environment variable
    #[clap(short = 'o', long)]
    upload_dir: Option<PathBuf>,
    /// Seconds between two status queries
    #[clap(long)]
    poll_interval: Option<f64>,
    /// Seconds to wait for a requested scan before giving up
    #[clap(long)]
    poll_timeout: Option<f64>,
    /// Set the log level
    #[arg(value_enum)]
    #[clap(short = 'L', long, default_value = "info")]
    log_level: LogLevel,
    /// Display timestamps with log messages
    #[clap(short = 'T', long)]
    timestamp: bool,
}

#[derive(Copy, Clone, ValueEnum, Debug)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Quiet,
}

#[tokio::main]
pub async fn main() {
    let args = Args::parse();

    tracing_subscriber_handler(&args);

    let config = match ScanClientConfig::from_env().and_then(|env| config_from_args(&args, env)) {
        Ok(config) => config,
        Err(e) => {
            error!("Error: {}", e);
            process::exit(1);
        }
    };

    let ledger = args
        .ledger
        .clone()
        .unwrap_or_else(|| config.upload_dir.join("links.jsonl"));
    let records = match JsonPatientRecords::open(&args.patients, ledger).await {
        Ok(records) => Arc::new(records),
        Err(e) => {
            error!("Error while loading patients: {}", e);
            process::exit(1);
        }
    };

    let client = match ScanClient::with_fs_store(config, records) {
        Ok(client) => client,
        Err(e) => {
            error!("Error: {}", e);
            process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling scan request.");
            ctrl_c.cancel();
        }
    });

    match client
        .acquire_scan(&args.uhid, &args.modality, &args.region, &cancel)
        .await
    {
        Ok(artifact) => {
            info!("{} saved for patient {}", artifact.description, args.uhid);
            println!("{}", artifact.path.display());
        }
        Err(e) if e.is_orphaned_artifact() => {
            error!("Scan stored but not linked, reconcile manually: {}", e);
            process::exit(2);
        }
        Err(e) => {
            error!("Error while acquiring scan: {}", e);
            process::exit(1);
        }
    }
}

/// `config` overridden by whatever was given on the command line.
fn config_from_args(
    args: &Args,
    mut config: ScanClientConfig,
) -> Result<ScanClientConfig, radscan_rs::ScanError> {
    if let Some(url) = &args.api_url {
        config = config.with_api_url(url.clone());
    }
    if let Some(dir) = &args.upload_dir {
        config = config.with_upload_dir(dir.clone());
    }
    if let Some(department) = &args.department {
        config.department = department.clone();
    }
    if let Some(secs) = args.poll_interval {
        config.poll_interval = seconds("--poll-interval", secs)?;
    }
    if let Some(secs) = args.poll_timeout {
        config.poll_timeout = seconds("--poll-timeout", secs)?;
    }
    config.validate()?;
    Ok(config)
}

fn seconds(flag: &str, secs: f64) -> Result<Duration, radscan_rs::ScanError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        radscan_rs::ScanError::Validation(format!("{} must be a positive number of seconds", flag))
    })
}

fn tracing_subscriber_handler(args: &Args) {
    let env_filter = match args.log_level {
        LogLevel::Debug => "radscan_rs=debug",
        LogLevel::Info => "radscan_rs=info",
        LogLevel::Warn => "radscan_rs=warn",
        LogLevel::Error => "radscan_rs=error",
        LogLevel::Quiet => "radscan_rs=off",
    };

    // "if" because the subscriber doesn't yield the same type with or without time which prevents
    // using a match statement.
    if args.timestamp {
        let sub = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(sub)
            .expect("Error while setting subscriber for tracing.");
    } else {
        let sub = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .without_time()
            .finish();
        tracing::subscriber::set_global_default(sub)
            .expect("Error while setting subscriber for tracing.");
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["radscan_rs", "-p", "DERM-00007", "-m", "CT", "-r", "CHEST"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_config_from_args_overrides() {
        let args = args(&[
            "-a",
            "http://pacs.local:9000",
            "-d",
            "Cardiology",
            "--poll-interval",
            "0.25",
            "--poll-timeout",
            "5",
        ]);
        let config = config_from_args(&args, ScanClientConfig::default()).unwrap();
        assert_eq!(config.api_url, "http://pacs.local:9000");
        assert_eq!(config.department, "Cardiology");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.poll_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_from_args_rejects_negative_interval() {
        let args = args(&["--poll-interval=-1"]);
        assert!(config_from_args(&args, ScanClientConfig::default()).is_err());
    }

    #[test]
    fn test_config_from_args_keeps_base_without_flags() {
        let base = ScanClientConfig::default().with_api_url("http://ris.local:5000");
        let config = config_from_args(&args(&[]), base.clone()).unwrap();
        assert_eq!(config, base);
    }
}
