//! The profiling session: trend statistics, snapshots and the shared symbol
//! table of one profiled process, backed by an append-only log file.

pub mod config;

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memprof_protocol::log::STAT_CONFIG_HEADER_SIZE;
use memprof_protocol::{FormatError, LOG_HEADER_SIZE, LogHeader, StatConfig, StatItem};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use config::{ConfigError, SessionConfig};

use crate::model::{DeviceInfo, MemoryStatItem, Symbol};
use crate::snapshot::{Snapshot, SnapshotError};
use crate::symbol_table::SymbolTable;
use crate::views::CallTree;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed session log: {0}")]
    Format(#[from] FormatError),
    #[error("bad device descriptor: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("session is not capturing")]
    NotLive,
    #[error("invalid session log: {0}")]
    Invalid(String),
    #[error("no snapshot at index {0}")]
    UnknownSnapshot(usize),
    #[error("snapshot {0} is not loaded")]
    SnapshotNotLoaded(usize),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> SessionError + '_ {
    move |source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Everything captured from, or loaded for, one profiled process.
///
/// A session is either live ([`start_new`]), appending stat items to its log
/// as they arrive, or in file mode ([`load_from_file`]) for offline review.
/// The log header is finalized by [`finish`], or on drop.
///
/// [`start_new`]: ProfilingSession::start_new
/// [`load_from_file`]: ProfilingSession::load_from_file
/// [`finish`]: ProfilingSession::finish
#[derive(Debug)]
pub struct ProfilingSession {
    config: SessionConfig,
    valid: bool,
    file_mode: bool,
    storage_dir: PathBuf,
    log_path: PathBuf,
    /// Open only while live.
    log_file: Option<File>,
    device: DeviceInfo,
    stat_config: StatConfig,
    stat: Vec<MemoryStatItem>,
    /// Stat count last written to the log header.
    stat_flushed: usize,
    snapshots: Vec<Snapshot>,
    snapshot_seq: u32,
    symbol_table: SymbolTable,
}

impl ProfilingSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            valid: false,
            file_mode: false,
            storage_dir: PathBuf::new(),
            log_path: PathBuf::new(),
            log_file: None,
            device: DeviceInfo::default(),
            stat_config: StatConfig::default(),
            stat: Vec::new(),
            stat_flushed: 0,
            snapshots: Vec::new(),
            snapshot_seq: 1,
            symbol_table: SymbolTable::new(),
        }
    }

    /// Begin a live capture into `dest_dir`.
    ///
    /// Creates the directory and a fresh log holding the header, `device` and
    /// `stat_config`. On failure the partially written log is removed and the
    /// session stays invalid.
    pub fn start_new(
        &mut self,
        stat_config: StatConfig,
        device: DeviceInfo,
        dest_dir: impl Into<PathBuf>,
    ) -> Result<(), SessionError> {
        self.reset(false);

        self.file_mode = false;
        self.storage_dir = dest_dir.into();
        self.log_path = self.storage_dir.join(&self.config.log_file_name);
        self.device = device;
        self.stat_config = stat_config;

        match self.create_log_file() {
            Ok(()) => {
                self.valid = true;
                info!(
                    log = %self.log_path.display(),
                    pools = self.alloc_pool_count(),
                    tags = self.tag_count(),
                    "profiling session started"
                );
                Ok(())
            }
            Err(e) => {
                self.reset(true);
                Err(e)
            }
        }
    }

    /// Open a finished (or interrupted) session log for review, together
    /// with the snapshot files found in the same directory.
    pub fn load_from_file(&mut self, path: impl Into<PathBuf>) -> Result<(), SessionError> {
        self.reset(false);

        self.file_mode = true;
        self.log_path = path.into();
        self.storage_dir = self
            .log_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        match self.load_log_file() {
            Ok(()) => {
                self.valid = true;
                self.look_for_snapshots();
                info!(
                    log = %self.log_path.display(),
                    stat_items = self.stat.len(),
                    snapshots = self.snapshots.len(),
                    "session log loaded"
                );
                Ok(())
            }
            Err(e) => {
                self.reset(false);
                Err(e)
            }
        }
    }

    /// Decode `count` raw stat items from `buf`, keep them and append the
    /// raw bytes to the log.
    pub fn append_stat_items(&mut self, buf: &[u8], count: usize) -> Result<(), SessionError> {
        if self.file_mode || self.log_file.is_none() {
            return Err(SessionError::NotLive);
        }

        let item_size = self.stat_config.item_size();
        let needed = count
            .checked_mul(item_size)
            .ok_or_else(|| FormatError::Layout(format!("{count} stat items overflow")))?;
        if buf.len() < needed {
            return Err(FormatError::Truncated {
                needed: needed as u64,
                available: buf.len() as u64,
            }
            .into());
        }
        let raw = &buf[..needed];
        let pools = self.alloc_pool_count();
        let tags = self.tag_count();
        let items = raw
            .chunks_exact(item_size)
            .map(|chunk| StatItem::parse(chunk, pools, tags))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(file) = self.log_file.as_mut() {
            file.write_all(raw).map_err(io_error(&self.log_path))?;
        }
        self.stat.extend(items);
        if self.stat.len() - self.stat_flushed >= self.config.stat_flush_threshold {
            self.update_file_header(false)?;
            self.stat_flushed = self.stat.len();
        }
        Ok(())
    }

    /// Register a snapshot file written during this session.
    ///
    /// The snapshot is placed in timestamp order; its index is returned.
    pub fn append_snapshot(&mut self, path: impl Into<PathBuf>) -> Result<usize, SessionError> {
        self.load_snapshot_descriptor(path.into())
    }

    pub fn flush(&mut self) -> Result<(), SessionError> {
        if let Some(file) = self.log_file.as_mut() {
            file.flush().map_err(io_error(&self.log_path))?;
        }
        Ok(())
    }

    /// Finalize the log header and close the log.
    ///
    /// The captured data stays available; further appends fail with
    /// [`SessionError::NotLive`].
    pub fn finish(&mut self) -> Result<(), SessionError> {
        if self.log_file.is_some() {
            self.update_file_header(true)?;
            self.log_file = None;
            info!(
                log = %self.log_path.display(),
                stat_items = self.stat.len(),
                "profiling session finished"
            );
        }
        Ok(())
    }

    /// Next free snapshot path in the session directory: `01.snapshot`,
    /// `02.snapshot` and so on.
    pub fn generate_snapshot_filename(&mut self) -> PathBuf {
        let name = format!("{:02}.{}", self.snapshot_seq, self.config.snapshot_extension);
        self.snapshot_seq += 1;
        self.storage_dir.join(name)
    }

    /// Index of the first stat item taken at or after `timestamp`.
    pub fn closest_stat_item(&self, timestamp: u64) -> Option<usize> {
        let index = self.stat.partition_point(|s| s.timestamp < timestamp);
        (index < self.stat.len()).then_some(index)
    }

    pub fn load_snapshot(&mut self, index: usize) -> Result<&Snapshot, SessionError> {
        let snapshot = self
            .snapshots
            .get_mut(index)
            .ok_or(SessionError::UnknownSnapshot(index))?;
        snapshot.load(&mut self.symbol_table)?;
        Ok(snapshot)
    }

    pub fn unload_snapshot(&mut self, index: usize) -> Result<(), SessionError> {
        self.snapshots
            .get_mut(index)
            .ok_or(SessionError::UnknownSnapshot(index))?
            .unload();
        Ok(())
    }

    /// Call tree of a loaded snapshot rooted at `roots`.
    pub fn create_branch(&self, index: usize, roots: &[Symbol]) -> Result<CallTree, SessionError> {
        let snapshot = self
            .snapshots
            .get(index)
            .ok_or(SessionError::UnknownSnapshot(index))?;
        if !snapshot.is_loaded() {
            return Err(SessionError::SnapshotNotLoaded(index));
        }
        Ok(snapshot.create_branch(&self.symbol_table, roots))
    }

    /// Interned symbols for `names`; names no snapshot mentions are dropped.
    pub fn resolve_names<S: AsRef<str>>(&self, names: &[S]) -> Vec<Symbol> {
        names
            .iter()
            .filter_map(|name| {
                let name = name.as_ref();
                let found = self.symbol_table.find(name).cloned();
                if found.is_none() {
                    debug!(name, "unknown symbol name");
                }
                found
            })
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_file_mode(&self) -> bool {
        self.file_mode
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn alloc_pool_count(&self) -> usize {
        self.stat_config.pool_names.len()
    }

    pub fn tag_count(&self) -> usize {
        self.stat_config.tag_names.len()
    }

    pub fn stat_count(&self) -> usize {
        self.stat.len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn stat_config(&self) -> &StatConfig {
        &self.stat_config
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    pub fn alloc_pool_name(&self, index: usize) -> Option<&str> {
        self.stat_config.pool_names.get(index).map(String::as_str)
    }

    /// Name of the pool whose mask is `mask`. Only single-bit masks name a pool.
    pub fn alloc_pool_name_by_mask(&self, mask: u32) -> Option<&str> {
        if !mask.is_power_of_two() {
            return None;
        }
        self.alloc_pool_name(mask.trailing_zeros() as usize)
    }

    pub fn tag_name(&self, index: usize) -> Option<&str> {
        self.stat_config.tag_names.get(index).map(String::as_str)
    }

    pub fn stat(&self, index: usize) -> Option<&MemoryStatItem> {
        self.stat.get(index)
    }

    pub fn stat_items(&self) -> &[MemoryStatItem] {
        &self.stat
    }

    pub fn last_stat(&self) -> Option<&MemoryStatItem> {
        self.stat.last()
    }

    pub fn snapshot(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn memory_log_file(&self) -> &Path {
        &self.log_path
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn create_log_file(&mut self) -> Result<(), SessionError> {
        if !self.storage_dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.storage_dir).map_err(io_error(&self.storage_dir))?;
        }

        let device_blob = self.device.to_bytes()?;
        let config_blob = self.stat_config.to_bytes();
        let header = LogHeader {
            stat_count: 0,
            finished: false,
            dev_info_size: device_blob.len() as u32,
            stat_config_size: config_blob.len() as u32,
            stat_item_size: self.stat_config.item_size() as u32,
        };

        let mut buf = Vec::with_capacity(LOG_HEADER_SIZE + device_blob.len() + config_blob.len());
        header.write_to(&mut buf).map_err(io_error(&self.log_path))?;
        buf.extend_from_slice(&device_blob);
        buf.extend_from_slice(&config_blob);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.log_path)
            .map_err(io_error(&self.log_path))?;
        file.write_all(&buf).map_err(io_error(&self.log_path))?;
        file.flush().map_err(io_error(&self.log_path))?;
        self.log_file = Some(file);
        Ok(())
    }

    fn load_log_file(&mut self) -> Result<(), SessionError> {
        let file = File::open(&self.log_path).map_err(io_error(&self.log_path))?;
        let file_len = file.metadata().map_err(io_error(&self.log_path))?.len();
        let mut reader = BufReader::new(file);

        let header = LogHeader::read_from(&mut reader)?;
        if header.dev_info_size == 0 {
            return Err(SessionError::Invalid("empty device descriptor".into()));
        }
        if (header.stat_config_size as usize) < STAT_CONFIG_HEADER_SIZE {
            return Err(SessionError::Invalid(format!(
                "stat config of {} bytes is shorter than its header",
                header.stat_config_size
            )));
        }
        let items_offset = header.items_offset();
        if file_len < items_offset {
            return Err(FormatError::Truncated {
                needed: items_offset,
                available: file_len,
            }
            .into());
        }

        let mut device_blob = vec![0u8; header.dev_info_size as usize];
        reader
            .read_exact(&mut device_blob)
            .map_err(io_error(&self.log_path))?;
        self.device = DeviceInfo::from_bytes(&device_blob)?;

        let mut config_blob = vec![0u8; header.stat_config_size as usize];
        reader
            .read_exact(&mut config_blob)
            .map_err(io_error(&self.log_path))?;
        self.stat_config = StatConfig::parse(&config_blob)?;

        let item_size = self.stat_config.item_size();
        if header.stat_item_size as usize != item_size {
            return Err(FormatError::Layout(format!(
                "log declares {}-byte stat items, config implies {item_size}",
                header.stat_item_size
            ))
            .into());
        }

        let complete = ((file_len - items_offset) / item_size as u64) as usize;
        let count = if header.finished {
            let declared = header.stat_count as usize;
            if declared > complete {
                return Err(FormatError::Truncated {
                    needed: items_offset + (declared * item_size) as u64,
                    available: file_len,
                }
                .into());
            }
            declared
        } else {
            warn!(
                log = %self.log_path.display(),
                declared = header.stat_count,
                recovered = complete,
                "session log was not finished, reading every complete stat item"
            );
            complete
        };

        self.read_stat_items(&mut reader, count, item_size)
    }

    fn read_stat_items<R: Read>(
        &mut self,
        reader: &mut R,
        count: usize,
        item_size: usize,
    ) -> Result<(), SessionError> {
        let pools = self.alloc_pool_count();
        let tags = self.tag_count();
        let chunk = self.config.stat_read_chunk.max(1);
        let mut buf = vec![0u8; chunk.min(count) * item_size];

        self.stat.reserve(count);
        let mut loaded = 0;
        while loaded < count {
            let n = chunk.min(count - loaded);
            let bytes = &mut buf[..n * item_size];
            reader.read_exact(bytes).map_err(io_error(&self.log_path))?;
            for raw in bytes.chunks_exact(item_size) {
                self.stat.push(StatItem::parse(raw, pools, tags)?);
            }
            loaded += n;
        }
        self.stat_flushed = self.stat.len();
        Ok(())
    }

    fn update_file_header(&mut self, finalize: bool) -> Result<(), SessionError> {
        let stat_count = self.stat.len() as u32;
        let path = &self.log_path;
        let Some(file) = self.log_file.as_mut() else {
            return Ok(());
        };

        file.seek(SeekFrom::Start(0)).map_err(io_error(path))?;
        let mut header = LogHeader::read_from(&mut *file)?;
        header.stat_count = stat_count;
        header.finished = finalize;
        file.seek(SeekFrom::Start(0)).map_err(io_error(path))?;
        header.write_to(&mut *file).map_err(io_error(path))?;
        file.seek(SeekFrom::End(0)).map_err(io_error(path))?;
        file.flush().map_err(io_error(path))?;
        Ok(())
    }

    fn look_for_snapshots(&mut self) {
        let dir = if self.storage_dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            self.storage_dir.as_path()
        };
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot scan for snapshots");
                return;
            }
        };

        let extension = OsStr::new(&self.config.snapshot_extension);
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension() == Some(extension))
            .collect();
        paths.sort();

        for path in paths {
            if let Err(e) = self.load_snapshot_descriptor(path.clone()) {
                warn!(path = %path.display(), error = %e, "skipping snapshot");
            }
        }
    }

    fn load_snapshot_descriptor(&mut self, path: PathBuf) -> Result<usize, SessionError> {
        let snapshot = Snapshot::open(path)?;
        let symbols = snapshot.register_symbols(&mut self.symbol_table)?;
        debug!(
            path = %snapshot.path().display(),
            timestamp = snapshot.timestamp(),
            symbols,
            "snapshot registered"
        );

        let timestamp = snapshot.timestamp();
        let index = self.snapshots.partition_point(|s| s.timestamp() <= timestamp);
        self.snapshots.insert(index, snapshot);
        Ok(index)
    }

    fn reset(&mut self, erase_files: bool) {
        if let Err(e) = self.finish() {
            error!(log = %self.log_path.display(), error = %e, "failed to finalize session log");
        }
        self.log_file = None;

        if erase_files && !self.log_path.as_os_str().is_empty() {
            if let Err(e) = fs::remove_file(&self.log_path) {
                debug!(log = %self.log_path.display(), error = %e, "could not remove session log");
            }
        }

        self.valid = false;
        self.file_mode = false;
        self.device = DeviceInfo::default();
        self.stat_config = StatConfig::default();
        self.stat.clear();
        self.stat_flushed = 0;
        self.snapshots.clear();
        self.snapshot_seq = 1;
        self.symbol_table = SymbolTable::new();
    }
}

impl Default for ProfilingSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Drop for ProfilingSession {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!(log = %self.log_path.display(), error = %e, "failed to finalize session log");
        }
    }
}
