//! # Command Line Interface
//!
//! Issues certificates with the X.509 engine and drives the configured
//! certificate manager. Backend settings come from `CLUSTER_CERTS_*`
//! environment variables (a `.env` file is honoured) and can be overridden
//! per invocation.

pub mod output;

use crate::cert_manager::{self, CertRef, Consumer};
use crate::config::{AppConfig, CertManagerType};
use crate::observability::{init_logging, log_config_info};
use crate::secrets::SecretString;
use crate::x509::{inspect_certificate, X509Engine};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use output::{emit_pem, print_fields, print_json, OutputFormat};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::Instrument;

#[derive(Parser)]
#[command(name = "cluster-certs")]
#[command(about = "Cluster CA issuance and certificate storage")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Certificate manager backend (barbican or local)
    #[arg(long, global = true)]
    pub backend: Option<CertManagerType>,

    /// Storage directory for the local backend
    #[arg(long, global = true)]
    pub storage_path: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(short, long, global = true, default_value = "text")]
    pub output: OutputFormat,
}

/// Validity and passphrase options shared by issuing commands
#[derive(Args, Debug, Clone)]
pub struct IssueArgs {
    /// Certificate lifetime in days (defaults to the configured term)
    #[arg(long)]
    pub validity_days: Option<u32>,

    /// Passphrase encrypting the generated private key
    #[arg(long)]
    pub passphrase: Option<String>,

    /// Write the certificate here instead of stdout
    #[arg(long)]
    pub out_cert: Option<PathBuf>,

    /// Write the private key here instead of stdout
    #[arg(long)]
    pub out_key: Option<PathBuf>,
}

/// CA key options shared by signing commands
#[derive(Args, Debug, Clone)]
pub struct CaKeyArgs {
    /// CA common name, used as the issuer
    #[arg(long)]
    pub issuer: String,

    /// PEM file holding the CA private key
    #[arg(long)]
    pub ca_key: PathBuf,

    /// Passphrase of the CA private key
    #[arg(long)]
    pub ca_passphrase: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a self-signed CA
    Ca {
        /// CA common name
        #[arg(long)]
        issuer: String,

        #[command(flatten)]
        issue: IssueArgs,
    },

    /// Generate a client certificate signed by a CA key
    Client {
        /// Client common name
        #[arg(long)]
        subject: String,

        #[command(flatten)]
        ca: CaKeyArgs,

        #[command(flatten)]
        issue: IssueArgs,
    },

    /// Sign a certificate signing request with a CA key
    Sign {
        /// PEM file holding the CSR
        #[arg(long)]
        csr: PathBuf,

        #[command(flatten)]
        ca: CaKeyArgs,

        /// Certificate lifetime in days (defaults to the configured term)
        #[arg(long)]
        validity_days: Option<u32>,

        /// Write the certificate here instead of stdout
        #[arg(long)]
        out_cert: Option<PathBuf>,
    },

    /// Show the identity and extensions of a PEM certificate
    Inspect {
        /// PEM file holding the certificate
        path: PathBuf,
    },

    /// Store a certificate bundle and print its reference
    Store {
        /// Bundle name
        #[arg(long)]
        name: String,

        /// PEM certificate file
        #[arg(long)]
        cert: PathBuf,

        /// PEM private key file
        #[arg(long)]
        key: PathBuf,

        /// PEM intermediates file
        #[arg(long)]
        intermediates: Option<PathBuf>,

        /// Passphrase of the private key
        #[arg(long)]
        passphrase: Option<String>,
    },

    /// Fetch a stored bundle, registering a consumer unless --check-only
    Get {
        reference: String,

        /// Resource registered as consumer of the reference
        #[arg(long)]
        resource_ref: Option<String>,

        /// Fetch without registering a consumer
        #[arg(long)]
        check_only: bool,

        /// Write the private key here
        #[arg(long)]
        out_key: Option<PathBuf>,
    },

    /// Release a consumer's claim on a stored bundle
    Release {
        reference: String,

        /// Resource registered as consumer of the reference
        #[arg(long)]
        resource_ref: String,
    },

    /// Delete a stored bundle regardless of consumers
    Purge { reference: String },
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("Failed to load configuration")?;
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }
    if let Some(backend) = cli.backend {
        config.certificates.cert_manager_type = backend;
    }
    if let Some(path) = cli.storage_path.clone() {
        config.certificates.storage_path = path;
    }
    init_logging(&config.observability);
    log_config_info(&config);

    let engine = X509Engine::new(config.x509.clone());

    match cli.command {
        Commands::Ca { issuer, issue } => {
            let issued = engine.generate_ca_certificate(
                &issuer,
                issue.passphrase.as_deref(),
                validity(issue.validity_days),
            )?;
            emit_pem(&issued.certificate, issue.out_cert.as_deref())?;
            emit_pem(issued.private_key.expose_secret(), issue.out_key.as_deref())?;
        }

        Commands::Client { subject, ca, issue } => {
            let ca_key = read_secret(&ca.ca_key)?;
            let issued = engine.generate_client_certificate(
                &ca.issuer,
                &subject,
                &ca_key,
                ca.ca_passphrase.as_deref(),
                issue.passphrase.as_deref(),
                validity(issue.validity_days),
            )?;
            emit_pem(&issued.certificate, issue.out_cert.as_deref())?;
            emit_pem(issued.private_key.expose_secret(), issue.out_key.as_deref())?;
        }

        Commands::Sign { csr, ca, validity_days, out_cert } => {
            let csr_pem = read_file(&csr)?;
            let ca_key = read_secret(&ca.ca_key)?;
            let certificate = engine.sign_csr(
                &csr_pem,
                &ca.issuer,
                &ca_key,
                ca.ca_passphrase.as_deref(),
                validity(validity_days),
            )?;
            emit_pem(&certificate, out_cert.as_deref())?;
        }

        Commands::Inspect { path } => {
            let info = inspect_certificate(&read_file(&path)?)?;
            match cli.output {
                OutputFormat::Json => print_json(&info)?,
                OutputFormat::Text => print_fields(&[
                    ("subject", info.subject_cn.clone()),
                    ("issuer", info.issuer_cn.clone()),
                    ("ca", Some(info.is_ca.to_string())),
                    ("path length", info.path_len.map(|p| p.to_string())),
                    ("key usage", Some(info.key_usage.join(", "))),
                    ("client auth", Some(info.client_auth.to_string())),
                    ("server auth", Some(info.server_auth.to_string())),
                    ("not before", Some(info.not_before.to_rfc3339())),
                    ("not after", Some(info.not_after.to_rfc3339())),
                    ("serial", Some(info.serial.clone())),
                ]),
            }
        }

        Commands::Store { name, cert, key, intermediates, passphrase } => {
            let handle = cert_manager::from_config(&config)?;
            let intermediates = intermediates.as_deref().map(read_file).transpose()?;
            let passphrase = passphrase.map(SecretString::new);

            let reference = handle
                .store_cert(
                    &read_file(&cert)?,
                    &read_secret(&key)?,
                    intermediates.as_deref(),
                    passphrase.as_ref(),
                    &name,
                )
                .instrument(crate::cert_span!("store_cert", name = %name))
                .await?;
            println!("{}", reference);
        }

        Commands::Get { reference, resource_ref, check_only, out_key } => {
            let handle = cert_manager::from_config(&config)?;
            let reference = CertRef::new(reference)?;
            let consumer = resource_ref
                .map(|r| Consumer::new(r, config.certificates.service_name.clone()));

            let bundle = handle
                .get_cert(&reference, consumer.as_ref(), check_only)
                .instrument(crate::cert_span!("get_cert", cert_ref = %reference))
                .await?;
            if let (Some(key), Some(path)) = (bundle.private_key(), out_key.as_deref()) {
                emit_pem(key.expose_secret(), Some(path))?;
            }

            let summary = BundleSummary {
                reference: reference.to_string(),
                certificate: bundle.certificate().map(str::to_string),
                intermediates: bundle.intermediates().map(str::to_string),
                has_private_key: bundle.private_key().is_some(),
                has_private_key_passphrase: bundle.private_key_passphrase().is_some(),
            };
            match cli.output {
                OutputFormat::Json => print_json(&summary)?,
                OutputFormat::Text => {
                    print_fields(&[
                        ("reference", Some(summary.reference.clone())),
                        ("private key", Some(summary.has_private_key.to_string())),
                        ("passphrase", Some(summary.has_private_key_passphrase.to_string())),
                    ]);
                    if let Some(certificate) = &summary.certificate {
                        print!("{}", certificate);
                    }
                    if let Some(intermediates) = &summary.intermediates {
                        print!("{}", intermediates);
                    }
                }
            }
        }

        Commands::Release { reference, resource_ref } => {
            let handle = cert_manager::from_config(&config)?;
            let consumer = Consumer::new(resource_ref, config.certificates.service_name.clone());
            let reference = CertRef::new(reference)?;
            handle
                .delete_cert(&reference, Some(&consumer))
                .instrument(crate::cert_span!("delete_cert", cert_ref = %reference))
                .await?;
            println!("Released");
        }

        Commands::Purge { reference } => {
            let handle = cert_manager::from_config(&config)?;
            let reference = CertRef::new(reference)?;
            handle
                .purge()
                .hard_delete(&reference)
                .instrument(crate::cert_span!("hard_delete", cert_ref = %reference))
                .await?;
            println!("Deleted");
        }
    }

    Ok(())
}

/// What `get` reports about a bundle. Key material is never printed.
#[derive(Debug, Serialize)]
struct BundleSummary {
    reference: String,
    certificate: Option<String>,
    intermediates: Option<String>,
    has_private_key: bool,
    has_private_key_passphrase: bool,
}

fn validity(days: Option<u32>) -> Option<time::Duration> {
    days.map(|days| time::Duration::days(i64::from(days)))
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_secret(path: &Path) -> anyhow::Result<SecretString> {
    read_file(path).map(SecretString::new)
}
