use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_WAL_RECORD_LEN;
use crate::model::Change;

const LEN_PREFIX: usize = 4;
const CRC_SUFFIX: usize = 4;

/// Encode one change as `[u32 len][bincode payload][u32 crc32]`.
fn encode_record(change: &Change) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(change).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_WAL_RECORD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record of {} bytes exceeds {MAX_WAL_RECORD_LEN}", payload.len()),
        ));
    }
    let mut record = Vec::with_capacity(LEN_PREFIX + payload.len() + CRC_SUFFIX);
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(&payload);
    record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(record)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

/// What a scan of a log image yielded.
#[derive(Debug)]
pub struct Recovered {
    pub changes: Vec<Change>,
    /// Offset just past the last intact record.
    pub valid_len: usize,
    /// Why the scan stopped before the end of the image.
    pub damage: Option<String>,
}

/// Decode records from the front of `bytes`, stopping at the first one that
/// is cut short, oversized, fails its checksum, or does not decode.
pub fn decode_records(bytes: &[u8]) -> Recovered {
    let mut changes = Vec::new();
    let mut pos = 0;

    let damage = loop {
        let rest = &bytes[pos..];
        if rest.is_empty() {
            break None;
        }
        if rest.len() < LEN_PREFIX {
            break Some("truncated length prefix".to_string());
        }
        let len = read_u32(rest) as usize;
        if len > MAX_WAL_RECORD_LEN {
            break Some(format!("record length {len} over limit"));
        }
        let record_len = LEN_PREFIX + len + CRC_SUFFIX;
        if rest.len() < record_len {
            break Some("truncated record".to_string());
        }
        let payload = &rest[LEN_PREFIX..LEN_PREFIX + len];
        if read_u32(&rest[LEN_PREFIX + len..]) != crc32fast::hash(payload) {
            break Some("checksum mismatch".to_string());
        }
        match bincode::deserialize::<Change>(payload) {
            Ok(change) => changes.push(change),
            Err(e) => break Some(format!("undecodable record: {e}")),
        }
        pos += record_len;
    };

    Recovered {
        changes,
        valid_len: pos,
        damage,
    }
}

/// Write-ahead log of `Change` records.
///
/// Changes are staged in memory and made durable together by `commit`.
/// The file never holds bytes past `committed_len` for longer than a
/// failing commit: a damaged tail is cut off on open, and a failed write
/// is cut off before the error is returned.
pub struct Wal {
    file: File,
    path: PathBuf,
    committed_len: u64,
    pending: Vec<u8>,
    pending_count: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path` and return the changes it holds.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Change>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let recovered = decode_records(&bytes);
        if let Some(damage) = &recovered.damage {
            tracing::warn!(
                "WAL {}: {damage} after {} records, cutting {} tail bytes",
                path.display(),
                recovered.changes.len(),
                bytes.len() - recovered.valid_len
            );
            file.set_len(recovered.valid_len as u64)?;
            file.sync_all()?;
        }
        let committed_len = recovered.valid_len as u64;
        file.seek(SeekFrom::Start(committed_len))?;

        let wal = Self {
            file,
            path: path.to_path_buf(),
            committed_len,
            pending: Vec::new(),
            pending_count: 0,
            appends_since_compact: 0,
        };
        Ok((wal, recovered.changes))
    }

    /// Stage a change for the next `commit`. A change that cannot be encoded
    /// is rejected alone and leaves the staged batch as it was.
    pub fn stage(&mut self, change: &Change) -> io::Result<()> {
        let record = encode_record(change)?;
        self.pending.extend_from_slice(&record);
        self.pending_count += 1;
        Ok(())
    }

    /// Write and fsync every staged change. On failure the file is cut back
    /// to its last committed length, so none of the batch survives.
    pub fn commit(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let written = self
            .file
            .write_all(&self.pending)
            .and_then(|()| self.file.sync_all());
        let bytes = self.pending.len() as u64;
        let count = self.pending_count;
        self.pending.clear();
        self.pending_count = 0;

        match written {
            Ok(()) => {
                self.committed_len += bytes;
                self.appends_since_compact += count;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    tracing::error!("WAL {}: rollback failed: {rollback}", self.path.display());
                }
                Err(e)
            }
        }
    }

    fn rollback(&mut self) -> io::Result<()> {
        self.file.set_len(self.committed_len)?;
        self.file.seek(SeekFrom::Start(self.committed_len))?;
        self.file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write `changes` to the side file that `swap_compact_file` installs.
    pub fn write_compact_file(path: &Path, changes: &[Change]) -> io::Result<()> {
        let mut image = Vec::new();
        for change in changes {
            image.extend_from_slice(&encode_record(change)?);
        }
        let mut file = File::create(Self::compact_tmp_path(path))?;
        file.write_all(&image)?;
        file.sync_all()
    }

    /// Replace the log with the compacted side file and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let len = file.seek(SeekFrom::End(0))?;
        self.file = file;
        self.committed_len = len;
        self.pending.clear();
        self.pending_count = 0;
        self.appends_since_compact = 0;
        Ok(())
    }
}
