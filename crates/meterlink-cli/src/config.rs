//! Command-line and environment configuration.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, ValueEnum};
use meterlink_core::MeasureType;
use meterlink_sync::{AnalyticsConfig, MeteringConfig, SyncOptions};

#[derive(Debug, Parser)]
#[command(
    name = "meterlink",
    version,
    about = "Publish contracts and synchronise metering data to the analytics platform"
)]
pub struct Cli {
    /// JSON contract dataset.
    #[arg(long, env = "METERLINK_DATASET")]
    pub dataset: PathBuf,

    /// DuckDB file holding watermarks and run reports.
    #[arg(long, env = "METERLINK_STORE", default_value = "meterlink.duckdb")]
    pub store: PathBuf,

    /// Contracts processed concurrently.
    #[arg(long, env = "METERLINK_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Days before now left out of every fetch.
    #[arg(
        long,
        env = "METERLINK_MARGIN_DAYS",
        default_value_t = 10,
        value_parser = clap::value_parser!(i64).range(0..)
    )]
    pub margin_days: i64,

    /// Measure types to synchronise.
    #[arg(
        long = "type",
        env = "METERLINK_TYPE",
        value_enum,
        ignore_case = true,
        default_value_t = TypeSelection::All
    )]
    pub types: TypeSelection,

    #[arg(
        long,
        env = "METERLINK_LOG_LEVEL",
        value_enum,
        ignore_case = true,
        default_value_t = LogLevel::Info
    )]
    pub log_level: LogLevel,

    /// Also write logs to this file.
    #[arg(long, env = "METERLINK_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Print the fetch plan of every contract and exit without remote calls or writes.
    #[arg(long, env = "METERLINK_DRY_RUN")]
    pub dry_run: bool,

    #[arg(long, env = "METERLINK_ANONYMIZE_KEY", hide_env_values = true)]
    pub anonymize_key: String,

    #[command(flatten)]
    pub api: ApiArgs,

    #[command(flatten)]
    pub metering: MeteringArgs,
}

impl Cli {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            margin_days: self.margin_days,
            workers: self.workers.max(1),
            types: self.types.kinds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TypeSelection {
    #[value(name = "PMAX")]
    Pmax,
    #[value(name = "CONSOGLO")]
    Consoglo,
    #[value(name = "CDC")]
    Cdc,
    #[value(name = "ALL")]
    All,
}

impl TypeSelection {
    pub fn kinds(self) -> Vec<MeasureType> {
        match self {
            TypeSelection::Pmax => vec![MeasureType::Pmax],
            TypeSelection::Consoglo => vec![MeasureType::Consoglo],
            TypeSelection::Cdc => vec![MeasureType::Cdc],
            TypeSelection::All => MeasureType::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING")]
    Warning,
    #[value(name = "ERROR")]
    Error,
}

impl LogLevel {
    /// `EnvFilter` directives for this level, with HTTP internals capped at warn.
    pub fn directives(self) -> String {
        let (level, cap) = match self {
            LogLevel::Debug => ("debug", "warn"),
            LogLevel::Info => ("info", "warn"),
            LogLevel::Warning => ("warn", "warn"),
            LogLevel::Error => ("error", "error"),
        };
        format!("{level},reqwest={cap},hyper={cap},hyper_util={cap},rustls={cap}")
    }
}

/// Analytics platform connection, taken from the environment.
#[derive(Debug, Args)]
pub struct ApiArgs {
    #[arg(id = "api_url", long = "api-url", env = "METERLINK_API_URL")]
    pub url: Option<String>,

    #[arg(long = "api-company-id", env = "METERLINK_API_COMPANY_ID")]
    pub company_id: Option<String>,

    #[arg(id = "api_user", long = "api-user", env = "METERLINK_API_USER")]
    pub user: Option<String>,

    #[arg(id = "api_password", long = "api-password", env = "METERLINK_API_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// PEM client certificate.
    #[arg(long = "api-cert", env = "METERLINK_API_CERT")]
    pub cert: Option<PathBuf>,

    /// PEM private key of the client certificate.
    #[arg(long = "api-key", env = "METERLINK_API_KEY")]
    pub key: Option<PathBuf>,

    /// Accept invalid server certificates.
    #[arg(long = "api-insecure", env = "METERLINK_API_INSECURE")]
    pub insecure: bool,
}

impl ApiArgs {
    pub fn config(&self) -> anyhow::Result<AnalyticsConfig> {
        let identity_pem = match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => {
                let mut pem = std::fs::read(cert)
                    .with_context(|| format!("reading client certificate {}", cert.display()))?;
                pem.push(b'\n');
                pem.extend(
                    std::fs::read(key)
                        .with_context(|| format!("reading client key {}", key.display()))?,
                );
                Some(pem)
            }
            (None, None) => None,
            _ => bail!("METERLINK_API_CERT and METERLINK_API_KEY must be set together"),
        };
        Ok(AnalyticsConfig {
            base_url: required(&self.url, "METERLINK_API_URL")?,
            company_id: required(&self.company_id, "METERLINK_API_COMPANY_ID")?,
            username: required(&self.user, "METERLINK_API_USER")?,
            password: required(&self.password, "METERLINK_API_PASSWORD")?,
            identity_pem,
            insecure: self.insecure,
        })
    }
}

/// Metering gateway connection, taken from the environment.
#[derive(Debug, Args)]
pub struct MeteringArgs {
    #[arg(id = "metering_url", long = "metering-url", env = "METERLINK_METERING_URL")]
    pub url: Option<String>,

    #[arg(id = "metering_user", long = "metering-user", env = "METERLINK_METERING_USER")]
    pub user: Option<String>,

    #[arg(
        id = "metering_password", long = "metering-password",
        env = "METERLINK_METERING_PASSWORD",
        hide_env_values = true
    )]
    pub password: Option<String>,

    /// Login of the person on whose behalf requests are issued.
    #[arg(long = "metering-initiator", env = "METERLINK_METERING_INITIATOR")]
    pub initiator: Option<String>,
}

impl MeteringArgs {
    pub fn config(&self) -> anyhow::Result<MeteringConfig> {
        Ok(MeteringConfig {
            base_url: required(&self.url, "METERLINK_METERING_URL")?,
            username: required(&self.user, "METERLINK_METERING_USER")?,
            password: required(&self.password, "METERLINK_METERING_PASSWORD")?,
            initiator: required(&self.initiator, "METERLINK_METERING_INITIATOR")?,
        })
    }
}

fn required(value: &Option<String>, name: &str) -> anyhow::Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => bail!("{name} is not set"),
    }
}
