//! Snapshot codec: reads and writes the binary `<dir>/<dbfilename>` file
//! described in spec §4.3 (magic/version header, optional metadata,
//! database selector, sizing hint, per-key records, 0xFF terminator).

mod cursor;
mod error;
mod format;
mod string_encoding;

pub use error::RdbError;

use cursor::Cursor;
use kvstore::{Entry, Store, Value};
use std::path::{Path, PathBuf};

/// Result of [`load`]: whether a file was found and applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// No file existed at `<dir>/<filename>`; the store is unchanged.
    Absent,
}

fn snapshot_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(filename)
}

/// Serializes every live string entry in `store` to the snapshot binary
/// format. List values are skipped (list persistence is a documented
/// extension point per spec §4.3, item 5).
fn encode(store: &Store) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format::MAGIC);

    out.push(format::OP_SELECTDB);
    out.push(0); // single database, index 0

    let entries: Vec<(&bytes::Bytes, &Entry)> = store
        .iter()
        .filter(|(_, e)| matches!(e.value, Value::Str(_)))
        .collect();

    out.push(format::OP_RESIZEDB);
    out.push(entries.len().min(u8::MAX as usize) as u8);
    out.push(
        entries
            .iter()
            .filter(|(_, e)| e.has_expiry())
            .count()
            .min(u8::MAX as usize) as u8,
    );

    for (key, entry) in entries {
        if entry.has_expiry() {
            out.push(format::OP_EXPIRETIME_MS);
            out.extend_from_slice(&entry.expires_at_ms.to_le_bytes());
        }
        out.push(format::VALUE_TYPE_STRING);
        string_encoding::encode(&mut out, key);
        match &entry.value {
            Value::Str(s) => string_encoding::encode(&mut out, s),
            Value::List(_) => unreachable!("filtered to Value::Str above"),
        }
    }

    out.push(format::OP_EOF);
    out
}

/// Parses the snapshot binary format and applies every entry to `store`.
fn decode(data: &[u8], store: &mut Store) -> Result<(), RdbError> {
    if data.len() < format::MAGIC.len() || &data[..format::MAGIC.len()] != format::MAGIC {
        return Err(RdbError::Corrupt("missing or mismatched REDIS magic/version header".into()));
    }
    let mut cursor = Cursor::new(&data[format::MAGIC.len()..]);

    loop {
        let tag = cursor.read_u8()?;
        match tag {
            format::OP_EOF => break,
            format::OP_AUX => {
                // Auxiliary (key, value) metadata field; not meaningful
                // to this implementation, but must be parsed to find the
                // next record.
                let _ = string_encoding::decode(&mut cursor)?;
                let _ = string_encoding::decode(&mut cursor)?;
            }
            format::OP_SELECTDB => {
                // Database index; any value is accepted and ignored
                // (single default database, per spec REDESIGN FLAGS).
                let _index = cursor.read_u8()?;
            }
            format::OP_RESIZEDB => {
                // Sizing hint only; the terminator is authoritative.
                let _key_count = cursor.read_u8()?;
                let _expiry_count = cursor.read_u8()?;
            }
            format::OP_EXPIRETIME_SEC => {
                let seconds = cursor.read_u32_le()?;
                let value_type = cursor.read_u8()?;
                load_entry(&mut cursor, store, value_type, u64::from(seconds) * 1000)?;
            }
            format::OP_EXPIRETIME_MS => {
                let ms = cursor.read_u64_le()?;
                let value_type = cursor.read_u8()?;
                load_entry(&mut cursor, store, value_type, ms)?;
            }
            value_type => load_entry(&mut cursor, store, value_type, 0)?,
        }
    }
    Ok(())
}

fn load_entry(
    cursor: &mut Cursor<'_>,
    store: &mut Store,
    value_type: u8,
    expires_at_ms: u64,
) -> Result<(), RdbError> {
    let key = string_encoding::decode(cursor)?;
    match value_type {
        format::VALUE_TYPE_STRING => {
            let value = string_encoding::decode(cursor)?;
            store.set(
                bytes::Bytes::from(key),
                Value::Str(bytes::Bytes::from(value)),
                expires_at_ms,
            );
            Ok(())
        }
        other => {
            tracing::warn!(value_type = other, "skipping snapshot entry of unsupported value type");
            Err(RdbError::Unsupported("non-string value type"))
        }
    }
}

/// Writes `store`'s string entries to `<dir>/<filename>`, creating `dir`
/// (mode 0755 on Unix) if it doesn't exist.
pub fn save(store: &Store, dir: &Path, filename: &str) -> Result<(), RdbError> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(dir)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(dir, perms)?;
    }
    let bytes = encode(store);
    let path = snapshot_path(dir, filename);
    std::fs::write(&path, &bytes)?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "wrote snapshot");
    Ok(())
}

/// Loads `<dir>/<filename>` into `store`. Returns
/// [`LoadOutcome::Absent`] (not an error) if the file doesn't exist.
pub fn load(store: &mut Store, dir: &Path, filename: &str) -> Result<LoadOutcome, RdbError> {
    let path = snapshot_path(dir, filename);
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadOutcome::Absent),
        Err(e) => return Err(RdbError::Io(e)),
    };
    decode(&data, store)?;
    tracing::info!(path = %path.display(), "loaded snapshot");
    Ok(LoadOutcome::Loaded)
}

/// Encodes `store` into the wire format used on disk, for embedding in
/// the `$<n>\r\n<bytes>` replication transfer (spec §4.3, "Snapshot
/// transfer framing"). Exposed so the replication path can avoid an
/// extra file round-trip when it already has a fresh snapshot in hand.
pub fn encode_for_transfer(store: &Store) -> Vec<u8> {
    encode(store)
}

/// Applies a snapshot received over the replication link directly to
/// `store`, the mirror image of [`encode_for_transfer`] on the replica
/// side. Avoids writing the transferred bytes to disk before loading
/// them, since the replica already has them in memory.
pub fn apply_transfer(data: &[u8], store: &mut Store) -> Result<(), RdbError> {
    decode(data, store)
}
