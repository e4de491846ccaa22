// Copyright (c) 2025 - Cowboy AI, LLC.

//! MANUAL-mode staging files
//!
//! Phase 1 parses and stages to `{uploadId}.ldif.json` (compact JSON) or
//! `{uploadId}.ml` (raw bytes) under the configured temp directory; the
//! original upload bytes are kept as `{uploadId}.raw` for retry. Everything
//! is removed on deletion or successful completion.

use crate::error::Result;
use crate::ldif::LdifEntry;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Path of the staged-LDIF file for an upload
pub fn ldif_path(temp_dir: &Path, upload_id: Uuid) -> PathBuf {
    temp_dir.join(format!("{upload_id}.ldif.json"))
}

/// Path of the staged master-list bytes for an upload
pub fn ml_path(temp_dir: &Path, upload_id: Uuid) -> PathBuf {
    temp_dir.join(format!("{upload_id}.ml"))
}

/// Path of the preserved original upload bytes
pub fn raw_path(temp_dir: &Path, upload_id: Uuid) -> PathBuf {
    temp_dir.join(format!("{upload_id}.raw"))
}

async fn ensure_dir(temp_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(temp_dir).await?;
    Ok(())
}

/// Stage parsed LDIF entries as compact JSON
pub async fn save_ldif_entries(
    temp_dir: &Path,
    upload_id: Uuid,
    entries: &[LdifEntry],
) -> Result<()> {
    ensure_dir(temp_dir).await?;
    let json = serde_json::to_vec(entries)?;
    tokio::fs::write(ldif_path(temp_dir, upload_id), json).await?;
    Ok(())
}

/// Load staged LDIF entries back
pub async fn load_ldif_entries(temp_dir: &Path, upload_id: Uuid) -> Result<Vec<LdifEntry>> {
    let bytes = tokio::fs::read(ldif_path(temp_dir, upload_id)).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Stage raw master-list bytes
pub async fn save_ml_bytes(temp_dir: &Path, upload_id: Uuid, bytes: &[u8]) -> Result<()> {
    ensure_dir(temp_dir).await?;
    tokio::fs::write(ml_path(temp_dir, upload_id), bytes).await?;
    Ok(())
}

/// Load staged master-list bytes back
pub async fn load_ml_bytes(temp_dir: &Path, upload_id: Uuid) -> Result<Vec<u8>> {
    Ok(tokio::fs::read(ml_path(temp_dir, upload_id)).await?)
}

/// Preserve the original upload bytes for retry
pub async fn save_raw(temp_dir: &Path, upload_id: Uuid, bytes: &[u8]) -> Result<()> {
    ensure_dir(temp_dir).await?;
    tokio::fs::write(raw_path(temp_dir, upload_id), bytes).await?;
    Ok(())
}

/// Load the preserved original bytes
pub async fn load_raw(temp_dir: &Path, upload_id: Uuid) -> Result<Vec<u8>> {
    Ok(tokio::fs::read(raw_path(temp_dir, upload_id)).await?)
}

/// Remove every staged artifact of an upload; missing files are fine
pub async fn cleanup(temp_dir: &Path, upload_id: Uuid) {
    for path in [
        ldif_path(temp_dir, upload_id),
        ml_path(temp_dir, upload_id),
        raw_path(temp_dir, upload_id),
    ] {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove staged file {}: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ldif_staging_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let entries = crate::ldif::parse_bytes(b"dn: cn=a\ncn: a\n\ndn: cn=b\ncn: b\n").unwrap();

        save_ldif_entries(dir.path(), id, &entries).await.unwrap();
        let loaded = load_ldif_entries(dir.path(), id).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].dn, "cn=a");

        cleanup(dir.path(), id).await;
        assert!(load_ldif_entries(dir.path(), id).await.is_err());
    }

    #[tokio::test]
    async fn ml_staging_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        save_ml_bytes(dir.path(), id, b"\x30\x03\x02\x01\x01").await.unwrap();
        assert_eq!(load_ml_bytes(dir.path(), id).await.unwrap(), b"\x30\x03\x02\x01\x01");
        cleanup(dir.path(), id).await;
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        cleanup(dir.path(), id).await;
        cleanup(dir.path(), id).await;
    }
}
