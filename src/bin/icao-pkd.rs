// Copyright (c) 2025 - Cowboy AI, LLC.

//! PKD management CLI
//!
//! Drives the core end to end: ingest certificate bundles, resume or retry
//! uploads, reconcile the directory, revalidate stored chains, and inspect
//! raw artifacts.

use clap::{Parser, Subcommand};
use icao_pkd::pipeline::progress::ProgressManager;
use icao_pkd::pipeline::Pipeline;
use icao_pkd::prelude::*;
use icao_pkd::reconcile::DEFAULT_CONCURRENCY;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "icao-pkd", version, about = "ICAO PKD management core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a certificate bundle (LDIF, Master List, Deviation List, cert, CRL)
    Ingest {
        /// Path of the file to ingest
        file: PathBuf,
        /// Two-phase manual mode (parse now, validate on `resume`)
        #[arg(long)]
        manual: bool,
        /// Force the file format instead of auto-detecting
        #[arg(long, value_parser = parse_format)]
        format: Option<FileFormat>,
    },
    /// Validate a MANUAL upload staged by `ingest --manual`
    Resume {
        /// Upload id
        upload_id: Uuid,
    },
    /// Retry a FAILED upload from its preserved bytes
    Retry {
        /// Upload id
        upload_id: Uuid,
    },
    /// Delete an upload (cancels it first when still running)
    DeleteUpload {
        /// Upload id
        upload_id: Uuid,
    },
    /// Diff the store against the directory and sync
    Reconcile {
        /// Stage and log operations without touching the directory
        #[arg(long)]
        dry_run: bool,
    },
    /// Rebuild unresolved trust chains and sweep expiry flags
    Revalidate,
    /// Report per-type DB vs directory counts
    SyncStatus,
    /// Show metadata and ASN.1 structure of a local file
    Inspect {
        /// Path of the file to inspect
        file: PathBuf,
    },
    /// List recent uploads
    History {
        /// Maximum rows
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Filter by status (UPLOADED, PARSING, PENDING, VALIDATING, COMPLETED, FAILED)
        #[arg(long)]
        status: Option<String>,
    },
    /// Aggregate ingestion and validation statistics
    Stats,
    /// Export stored certificates of one type as LDIF
    Export {
        /// DB certificate type (CSCA, DSC, DSC_NC, MLSC)
        #[arg(long, default_value = "DSC")]
        cert_type: String,
        /// Maximum number of entries
        #[arg(long, default_value_t = 1000)]
        limit: i64,
    },
    /// Run the periodic reconciler and revalidator until interrupted
    Run,
}

fn parse_format(s: &str) -> std::result::Result<FileFormat, String> {
    FileFormat::parse(&s.to_ascii_uppercase())
        .ok_or_else(|| format!("unknown format '{s}' (LDIF, ML, DL, CERT, CRL)"))
}

async fn connect_directory(config: &AppConfig) -> Option<Arc<dyn Directory>> {
    match LdapPool::connect(&config.ldap).await {
        Ok(pool) => Some(Arc::new(LdapStore::new(Arc::new(pool))) as Arc<dyn Directory>),
        Err(e) => {
            tracing::warn!("directory unavailable ({e}); running DB-only, reconciler will sync");
            None
        }
    }
}

async fn build_pipeline(config: &AppConfig, store: Store) -> Result<Pipeline> {
    let directory = connect_directory(config).await;
    // Already verified readable during validate(); a race here is fatal too
    let anchor = config.load_trust_anchor()?;
    tracing::info!(
        "trust anchor loaded from {}",
        config.trust_anchor_path.display()
    );
    Ok(Pipeline::new(
        store,
        directory,
        Arc::new(ProgressManager::new()),
        config,
        Some(anchor),
    ))
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::from_env();

    if let Command::Inspect { file } = &cli.command {
        return inspect(&config, file);
    }

    config.validate()?;
    let store = Store::connect(&config).await?;

    match cli.command {
        Command::Ingest {
            file,
            manual,
            format,
        } => {
            let bytes = std::fs::read(&file)?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());
            let mode = if manual {
                ProcessingMode::Manual
            } else {
                ProcessingMode::Auto
            };
            let pipeline = build_pipeline(&config, store.clone()).await?;

            match pipeline.ingest(&name, &bytes, mode, format).await {
                Ok(upload_id) => {
                    println!("upload {upload_id} ingested");
                    if mode == ProcessingMode::Auto {
                        // A fresh CSCA may unblock previously pending chains
                        let outcome = Revalidator::new(store).run().await?;
                        if outcome.valid + outcome.expired_valid > 0 {
                            println!(
                                "revalidation promoted {} certificate(s)",
                                outcome.valid + outcome.expired_valid
                            );
                        }
                    }
                }
                Err(PkdError::DuplicateUpload { existing_id }) => {
                    println!("duplicate of existing upload {existing_id}");
                }
                Err(e) => return Err(e),
            }
        }
        Command::Resume { upload_id } => {
            let pipeline = build_pipeline(&config, store.clone()).await?;
            pipeline.resume(upload_id).await?;
            println!("upload {upload_id} validated");
            let outcome = Revalidator::new(store).run().await?;
            if outcome.valid + outcome.expired_valid > 0 {
                println!(
                    "revalidation promoted {} certificate(s)",
                    outcome.valid + outcome.expired_valid
                );
            }
        }
        Command::Retry { upload_id } => {
            let pipeline = build_pipeline(&config, store).await?;
            pipeline.retry(upload_id).await?;
            println!("upload {upload_id} reprocessed");
        }
        Command::DeleteUpload { upload_id } => {
            let pipeline = build_pipeline(&config, store).await?;
            pipeline.delete_upload(upload_id).await?;
            println!("upload {upload_id} deleted");
        }
        Command::Reconcile { dry_run } => {
            let directory = connect_directory(&config)
                .await
                .ok_or_else(|| PkdError::Config("reconciliation needs the directory".into()))?;
            let reconciler = Reconciler::new(store, directory, DEFAULT_CONCURRENCY);
            let outcome = reconciler.run("cli", dry_run, None).await?;
            println!(
                "reconciliation {} finished: {} ({}ms, {} ok, {} failed)",
                outcome.summary_id,
                outcome.status,
                outcome.duration_ms,
                outcome.counters.success,
                outcome.counters.failed
            );
        }
        Command::Revalidate => {
            let outcome = Revalidator::new(store).run().await?;
            println!(
                "revalidation: {} processed, {} valid, {} expired-valid, {} invalid, {} pending",
                outcome.total_processed,
                outcome.valid,
                outcome.expired_valid,
                outcome.invalid,
                outcome.pending
            );
        }
        Command::SyncStatus => {
            let directory = connect_directory(&config)
                .await
                .ok_or_else(|| PkdError::Config("sync status needs the directory".into()))?;
            let reconciler = Reconciler::new(store, directory, DEFAULT_CONCURRENCY);
            let status = reconciler.sync_status().await?;
            for t in &status.types {
                println!(
                    "{:<8} db={:<7} ldap={:<7} diff={}",
                    t.cert_type, t.db_count, t.ldap_count, t.discrepancy
                );
            }
            println!("status: {}", status.status);
        }
        Command::Run => {
            let directory = connect_directory(&config)
                .await
                .ok_or_else(|| PkdError::Config("run mode needs the directory".into()))?;
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

            let interval_min = config.auto_reconcile_interval_min.max(1) as u64;
            let reconciler = Arc::new(Reconciler::new(
                store.clone(),
                directory,
                DEFAULT_CONCURRENCY,
            ));
            let revalidator = Arc::new(Revalidator::new(store));

            let recon_rx = shutdown_rx.clone();
            let recon = reconciler.clone();
            let recon_task = tokio::spawn(async move {
                recon
                    .run_periodic(std::time::Duration::from_secs(interval_min * 60), recon_rx)
                    .await;
            });
            let reval_rx = shutdown_rx.clone();
            let reval = revalidator.clone();
            let reval_task = tokio::spawn(async move {
                reval
                    .run_periodic(std::time::Duration::from_secs(interval_min * 60), reval_rx)
                    .await;
            });

            println!("periodic loops running every {interval_min} minute(s); ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            let _ = shutdown_tx.send(true);
            let _ = recon_task.await;
            let _ = reval_task.await;
        }
        Command::History { limit, status } => {
            let status_filter = match status.as_deref() {
                Some(s) => Some(UploadStatus::parse(&s.to_ascii_uppercase()).ok_or_else(
                    || PkdError::InvalidState(format!("unknown status '{s}'")),
                )?),
                None => None,
            };
            let total = store.uploads.count_history(status_filter, None).await?;
            let rows = store.uploads.history(status_filter, None, limit, 0).await?;
            for row in &rows {
                println!(
                    "{}  {:<10} {:<5} {:>9}B  {}  {}/{} entries",
                    row.id,
                    row.status,
                    row.file_format,
                    row.file_size,
                    row.created_at.format("%Y-%m-%dT%H:%M:%SZ"),
                    row.processed_entries,
                    row.total_entries
                );
            }
            println!("{} of {total} upload(s)", rows.len());
        }
        Command::Stats => {
            let counters = store.uploads.global_statistics().await?;
            println!(
                "certificates: CSCA {}, DSC {}, DSC_NC {}, MLSC {}",
                counters.csca, counters.dsc, counters.dsc_nc, counters.mlsc
            );
            println!("lists: CRL {}, ML {}", counters.crl, counters.ml);
            println!(
                "outcomes: valid {}, expired-valid {}, invalid {}, pending {}, error {}, duplicates {}",
                counters.valid,
                counters.expired_valid,
                counters.invalid,
                counters.pending,
                counters.error,
                counters.duplicate
            );
            for (status, count) in store.validations.global_status_counts().await? {
                println!("validation rows {status}: {count}");
            }
            for (country, count) in store.certificates.counts_by_country(10).await? {
                println!("country {country}: {count} certificate(s)");
            }
        }
        Command::Export { cert_type, limit } => {
            let db_type = cert_type.to_ascii_uppercase();
            let rows = store.certificates.list_by_type(&db_type, limit).await?;
            let ldap_config = config.ldap.clone();
            println!("version: 1");
            for row in rows {
                let entry_type = match (row.cert_type.as_str(), &row.subject_dn, &row.issuer_dn) {
                    ("CSCA", s, i) if !icao_pkd::x509::dn::equals(s, i) => CertType::LinkCert,
                    ("CSCA", _, _) => CertType::Csca,
                    ("DSC_NC", _, _) => CertType::DscNc,
                    ("MLSC", _, _) => CertType::Mlsc,
                    _ => CertType::Dsc,
                };
                let dn = icao_pkd::ldap::dn::certificate_dn_v2(
                    &ldap_config,
                    entry_type,
                    &row.country_code,
                    &row.fingerprint_sha256,
                );
                println!();
                println!("{}", icao_pkd::ldif::fold_line(&format!("dn: {dn}")));
                println!("objectClass: inetOrgPerson");
                println!("objectClass: pkdDownload");
                println!("{}", icao_pkd::ldif::render_attribute("cn", row.fingerprint_sha256.as_bytes()));
                println!("{}", icao_pkd::ldif::render_attribute("sn", row.serial_number.as_bytes()));
                println!(
                    "{}",
                    icao_pkd::ldif::render_attribute("userCertificate;binary", &row.der_bytes)
                );
            }
        }
        Command::Inspect { .. } => unreachable!("handled before store connect"),
    }
    Ok(())
}

fn inspect(config: &AppConfig, file: &PathBuf) -> Result<()> {
    let bytes = std::fs::read(file)?;
    let max_lines = config.asn1_max_lines as usize;

    match icao_pkd::x509::parse_auto(&bytes)? {
        icao_pkd::x509::DetectedFormat::Certificate(der) => {
            let meta = icao_pkd::x509::extract_metadata(&der)?;
            println!("subject:     {}", meta.subject_dn);
            println!("issuer:      {}", meta.issuer_dn);
            println!("serial:      {}", meta.serial_number);
            println!("validity:    {} .. {}", meta.not_before, meta.not_after);
            println!(
                "algorithm:   {} ({} bits {})",
                meta.signature_algorithm, meta.public_key_size, meta.public_key_algorithm
            );
            println!("fingerprint: {}", meta.fingerprint_sha256);
            println!("self-signed: {}", meta.is_self_signed);
            println!();
            println!("{}", icao_pkd::x509::asn1dump::dump(&der, max_lines));
        }
        icao_pkd::x509::DetectedFormat::Crl(der) => {
            let meta = icao_pkd::crl::parse_crl(&der)?;
            println!("issuer:      {}", meta.issuer_dn);
            println!("this update: {}", meta.this_update);
            if let Some(next) = meta.next_update {
                println!("next update: {next}");
            }
            println!("revoked:     {} serial(s)", meta.revoked.len());
            println!();
            println!("{}", icao_pkd::x509::asn1dump::dump(&der, max_lines));
        }
        icao_pkd::x509::DetectedFormat::Cms(der) => {
            println!("CMS SignedData ({} bytes)", der.len());
            println!();
            println!("{}", icao_pkd::x509::asn1dump::dump(&der, max_lines));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
