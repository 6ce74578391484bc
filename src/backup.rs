use crate::db::DB_FILE;
use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const BUNDLE_FORMAT_V1: &str = "schoold-workspace-v1";
const RAW_SQLITE_FORMAT: &str = "sqlite3";

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/schoold.sqlite3";
const WORKSPACE_ENTRY: &str = "meta/workspace.json";

const ZIP_MAGIC: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    version: u32,
    app_version: String,
    exported_at: String,
    #[serde(default)]
    db_sha256: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceMeta<'a> {
    source_workspace: &'a str,
    schema_entities: usize,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_hex(mut reader: impl Read) -> anyhow::Result<String> {
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher).context("failed to hash database")?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let f = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    sha256_hex(f)
}

fn write_json_entry<W: Write + std::io::Seek, T: Serialize>(
    zip: &mut ZipWriter<W>,
    name: &str,
    value: &T,
    opts: FileOptions,
) -> anyhow::Result<()> {
    zip.start_file(name, opts)
        .with_context(|| format!("failed to start {}", name))?;
    let text = serde_json::to_string_pretty(value).with_context(|| format!("failed to encode {}", name))?;
    zip.write_all(text.as_bytes())
        .with_context(|| format!("failed to write {}", name))
}

/// Zips the workspace database with a manifest carrying its checksum.
pub fn export_workspace_bundle(workspace: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let db_path = workspace.join(DB_FILE);
    if !db_path.is_file() {
        bail!("workspace database not found: {}", db_path.display());
    }
    if let Some(dir) = out_path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let db_sha256 = sha256_file(&db_path)?;
    let manifest = Manifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        version: 1,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        db_sha256: Some(db_sha256.clone()),
    };
    let source = workspace.to_string_lossy();
    let meta = WorkspaceMeta {
        source_workspace: &source,
        schema_entities: crate::model::EntityKind::ALL.len(),
    };

    let out = File::create(out_path).with_context(|| format!("failed to create {}", out_path.display()))?;
    let mut zip = ZipWriter::new(out);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    write_json_entry(&mut zip, MANIFEST_ENTRY, &manifest, opts)?;
    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db = File::open(&db_path).with_context(|| format!("failed to open {}", db_path.display()))?;
    std::io::copy(&mut db, &mut zip).context("failed to write database entry")?;
    write_json_entry(&mut zip, WORKSPACE_ENTRY, &meta, opts)?;
    zip.finish().context("failed to finalize bundle")?;

    Ok(ExportSummary {
        bundle_format: manifest.format,
        entry_count: 3,
        db_sha256,
    })
}

fn starts_with_magic(path: &Path, magic: &[u8]) -> anyhow::Result<bool> {
    let mut f = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut head = vec![0u8; magic.len()];
    match f.read_exact(&mut head) {
        Ok(()) => Ok(head == magic),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).context("failed to read file signature"),
    }
}

/// Moves a verified staging file over the live database.
fn swap_in(staging: &Path, workspace: &Path, dst: &Path) -> anyhow::Result<()> {
    for suffix in ["-wal", "-shm", "-journal"] {
        let _ = std::fs::remove_file(workspace.join(format!("{}{}", DB_FILE, suffix)));
    }
    if dst.exists() {
        std::fs::remove_file(dst)
            .with_context(|| format!("failed to remove old database {}", dst.display()))?;
    }
    std::fs::rename(staging, dst)
        .with_context(|| format!("failed to move restored database to {}", dst.display()))
}

fn read_manifest<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> anyhow::Result<Manifest> {
    let mut text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle has no manifest.json")?
        .read_to_string(&mut text)
        .context("failed to read manifest.json")?;
    let manifest: Manifest = serde_json::from_str(&text).context("manifest.json is malformed")?;
    if manifest.format != BUNDLE_FORMAT_V1 {
        bail!("unsupported bundle format: {}", manifest.format);
    }
    Ok(manifest)
}

/// Restores a bundle (or a bare database file) into `workspace`, replacing
/// its database. The caller must have closed any open connection.
pub fn import_workspace_bundle(in_path: &Path, workspace: &Path) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;
    let dst = workspace.join(DB_FILE);
    // Staged beside the live file so the final rename stays on one filesystem.
    let staging = workspace.join(format!("{}.importing", DB_FILE));

    if !starts_with_magic(in_path, ZIP_MAGIC)? {
        if !starts_with_magic(in_path, SQLITE_MAGIC)? {
            bail!("not a workspace bundle or SQLite database: {}", in_path.display());
        }
        std::fs::copy(in_path, &staging)
            .with_context(|| format!("failed to copy {} to {}", in_path.display(), staging.display()))?;
        swap_in(&staging, workspace, &dst)?;
        return Ok(ImportSummary {
            bundle_format_detected: RAW_SQLITE_FORMAT.to_string(),
        });
    }

    let f = File::open(in_path).with_context(|| format!("failed to open {}", in_path.display()))?;
    let mut archive = ZipArchive::new(f).context("not a valid zip bundle")?;
    let manifest = read_manifest(&mut archive)?;

    {
        let mut entry = archive
            .by_name(DB_ENTRY)
            .with_context(|| format!("bundle has no {}", DB_ENTRY))?;
        let mut out = File::create(&staging)
            .with_context(|| format!("failed to create {}", staging.display()))?;
        std::io::copy(&mut entry, &mut out).context("failed to extract database")?;
        out.flush().context("failed to flush extracted database")?;
    }

    if let Some(expected) = manifest.db_sha256.as_deref() {
        let actual = sha256_file(&staging)?;
        if actual != expected {
            let _ = std::fs::remove_file(&staging);
            return Err(anyhow!(
                "database checksum mismatch (expected {}, got {})",
                expected,
                actual
            ));
        }
    }

    if !starts_with_magic(&staging, SQLITE_MAGIC)? {
        let _ = std::fs::remove_file(&staging);
        bail!("bundle database entry is not a SQLite database");
    }
    swap_in(&staging, workspace, &dst)?;

    Ok(ImportSummary {
        bundle_format_detected: manifest.format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    fn seeded_workspace() -> std::path::PathBuf {
        let ws = temp_dir("schoold-backup-unit");
        let conn = db::open_db(&ws).unwrap();
        db::settings_set_json(&conn, "table.pageSize", &serde_json::json!(4)).unwrap();
        drop(conn);
        ws
    }

    #[test]
    fn export_then_import_restores_database() {
        let ws = seeded_workspace();
        let bundle = ws.join("out").join("bundle.zip");
        let summary = export_workspace_bundle(&ws, &bundle).unwrap();
        assert_eq!(summary.bundle_format, BUNDLE_FORMAT_V1);
        assert_eq!(summary.db_sha256.len(), 64);

        let restored = temp_dir("schoold-backup-restore");
        let import = import_workspace_bundle(&bundle, &restored).unwrap();
        assert_eq!(import.bundle_format_detected, BUNDLE_FORMAT_V1);
        let conn = db::open_db(&restored).unwrap();
        assert_eq!(db::settings_get_usize(&conn, "table.pageSize"), Some(4));
    }

    #[test]
    fn bare_database_file_is_accepted() {
        let ws = seeded_workspace();
        let restored = temp_dir("schoold-backup-raw");
        let import = import_workspace_bundle(&ws.join(DB_FILE), &restored).unwrap();
        assert_eq!(import.bundle_format_detected, "sqlite3");
        assert!(restored.join(DB_FILE).is_file());
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let ws = seeded_workspace();
        let bundle = ws.join("tampered.zip");
        {
            let mut zip = ZipWriter::new(File::create(&bundle).unwrap());
            let opts = FileOptions::default();
            let manifest = Manifest {
                format: BUNDLE_FORMAT_V1.to_string(),
                version: 1,
                app_version: "0".into(),
                exported_at: "now".into(),
                db_sha256: Some("0".repeat(64)),
            };
            write_json_entry(&mut zip, MANIFEST_ENTRY, &manifest, opts).unwrap();
            zip.start_file(DB_ENTRY, opts).unwrap();
            zip.write_all(b"not really sqlite").unwrap();
            zip.finish().unwrap();
        }
        let restored = temp_dir("schoold-backup-tampered");
        let e = import_workspace_bundle(&bundle, &restored).unwrap_err();
        assert!(e.to_string().contains("checksum mismatch"));
        assert!(!restored.join(DB_FILE).exists());
    }

    #[test]
    fn foreign_file_leaves_existing_database_untouched() {
        let ws = seeded_workspace();
        let before = std::fs::read(ws.join(DB_FILE)).unwrap();
        let notes = ws.join("notes.txt");
        std::fs::write(&notes, "hello").unwrap();

        let e = import_workspace_bundle(&notes, &ws).unwrap_err();
        assert!(e.to_string().contains("not a workspace bundle"));
        assert_eq!(std::fs::read(ws.join(DB_FILE)).unwrap(), before);
        assert!(!ws.join(format!("{}.importing", DB_FILE)).exists());

        let conn = db::open_db(&ws).unwrap();
        assert_eq!(db::settings_get_usize(&conn, "table.pageSize"), Some(4));
    }
}
