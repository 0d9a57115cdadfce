use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use memprof_protocol::{FormatError, SnapshotFile, SnapshotHeader};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::model::{MemoryBlock, Symbol};
use crate::symbol_table::{INVALID_ADDRESS, SymbolTable};
use crate::views::CallTree;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("cannot read snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed snapshot {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
    #[error("snapshot {0} holds no blocks or no backtrace frames")]
    Empty(PathBuf),
}

impl SnapshotError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn format(path: &Path, source: FormatError) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Lightweight description of a snapshot, kept while its blocks are unloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotDescriptor {
    pub path: PathBuf,
    pub timestamp: u64,
    pub block_count: usize,
    pub symbol_count: usize,
    pub bktrace_count: usize,
    /// Size of the snapshot file in bytes.
    pub total_size: u64,
}

impl SnapshotDescriptor {
    fn from_header(path: PathBuf, header: &SnapshotHeader) -> Self {
        Self {
            path,
            timestamp: header.timestamp,
            block_count: header.block_count as usize,
            symbol_count: header.symbol_count as usize,
            bktrace_count: header.bktrace_count as usize,
            total_size: header.size,
        }
    }
}

#[derive(Debug, Default)]
struct LoadedBlocks {
    /// Sorted by `order_no`, ascending.
    blocks: Vec<MemoryBlock>,
    /// Backtrace hash → indices into `blocks`, ascending.
    by_bktrace: BTreeMap<u32, Vec<usize>>,
}

/// A point-in-time capture of the live allocations of a process.
///
/// A snapshot starts out as a descriptor read from the file header. [`load`]
/// brings in the blocks and feeds symbols and backtraces into the shared
/// [`SymbolTable`]; [`unload`] drops them again.
///
/// [`load`]: Snapshot::load
/// [`unload`]: Snapshot::unload
#[derive(Debug)]
pub struct Snapshot {
    descriptor: SnapshotDescriptor,
    loaded: Option<LoadedBlocks>,
}

impl Snapshot {
    /// Read and validate only the header of the snapshot at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| SnapshotError::io(&path, e))?;
        let actual = file
            .metadata()
            .map_err(|e| SnapshotError::io(&path, e))?
            .len();
        let header = SnapshotHeader::read_from(&mut BufReader::new(file))
            .map_err(|e| SnapshotError::format(&path, e))?;
        check_header(&path, &header, actual)?;

        Ok(Self {
            descriptor: SnapshotDescriptor::from_header(path, &header),
            loaded: None,
        })
    }

    /// Build a loaded snapshot from a fully received buffer.
    ///
    /// `path` is only used for identification and later reloads.
    pub fn from_bytes(
        path: impl Into<PathBuf>,
        data: &[u8],
        table: &mut SymbolTable,
    ) -> Result<Self, SnapshotError> {
        let path = path.into();
        let file = SnapshotFile::parse(data).map_err(|e| SnapshotError::format(&path, e))?;
        check_header(&path, &file.header, data.len() as u64)?;

        let descriptor = SnapshotDescriptor::from_header(path, &file.header);
        let loaded = ingest(file, table);
        Ok(Self {
            descriptor,
            loaded: Some(loaded),
        })
    }

    /// Register the symbol array of the file with `table` without loading blocks.
    ///
    /// Returns the number of symbol records read.
    pub fn register_symbols(&self, table: &mut SymbolTable) -> Result<usize, SnapshotError> {
        let path = &self.descriptor.path;
        let data = fs::read(path).map_err(|e| SnapshotError::io(path, e))?;
        let header = SnapshotHeader::parse(&data).map_err(|e| SnapshotError::format(path, e))?;
        let symbols = SnapshotFile::parse_symbols(&header, &data)
            .map_err(|e| SnapshotError::format(path, e))?;
        for symbol in &symbols {
            add_symbol_record(table, symbol.addr, &symbol.name);
        }
        Ok(symbols.len())
    }

    /// Read the whole file and index its blocks. Does nothing if already loaded.
    pub fn load(&mut self, table: &mut SymbolTable) -> Result<(), SnapshotError> {
        if self.is_loaded() {
            return Ok(());
        }

        let path = self.descriptor.path.clone();
        let data = fs::read(&path).map_err(|e| SnapshotError::io(&path, e))?;
        let file = SnapshotFile::parse(&data).map_err(|e| SnapshotError::format(&path, e))?;
        check_header(&path, &file.header, data.len() as u64)?;

        self.descriptor = SnapshotDescriptor::from_header(path, &file.header);
        self.loaded = Some(ingest(file, table));
        debug!(
            path = %self.descriptor.path.display(),
            blocks = self.descriptor.block_count,
            bktraces = self.descriptor.bktrace_count,
            "snapshot loaded"
        );
        Ok(())
    }

    /// Release blocks and index; the descriptor stays.
    pub fn unload(&mut self) {
        self.loaded = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn descriptor(&self) -> &SnapshotDescriptor {
        &self.descriptor
    }

    pub fn path(&self) -> &Path {
        &self.descriptor.path
    }

    pub fn timestamp(&self) -> u64 {
        self.descriptor.timestamp
    }

    pub fn block_count(&self) -> usize {
        self.descriptor.block_count
    }

    pub fn symbol_count(&self) -> usize {
        self.descriptor.symbol_count
    }

    pub fn bktrace_count(&self) -> usize {
        self.descriptor.bktrace_count
    }

    pub fn total_size(&self) -> u64 {
        self.descriptor.total_size
    }

    /// All blocks sorted by allocation order; empty when not loaded.
    pub fn memory_blocks(&self) -> &[MemoryBlock] {
        match &self.loaded {
            Some(loaded) => &loaded.blocks,
            None => &[],
        }
    }

    pub fn block(&self, index: usize) -> Option<&MemoryBlock> {
        self.memory_blocks().get(index)
    }

    /// Indices of the blocks allocated under backtrace `hash`.
    pub fn blocks_for_backtrace(&self, hash: u32) -> &[usize] {
        match self.loaded.as_ref().and_then(|l| l.by_bktrace.get(&hash)) {
            Some(indices) => indices,
            None => &[],
        }
    }

    /// Iterate the backtrace index in hash order.
    pub fn backtrace_blocks(&self) -> impl Iterator<Item = (u32, &[usize])> + '_ {
        self.loaded
            .iter()
            .flat_map(|l| l.by_bktrace.iter().map(|(&h, v)| (h, v.as_slice())))
    }

    /// Build the call tree of this snapshot starting at any of `roots`.
    pub fn create_branch(&self, table: &SymbolTable, roots: &[Symbol]) -> CallTree {
        debug_assert!(self.is_loaded(), "create_branch on an unloaded snapshot");
        CallTree::build(self, table, roots)
    }
}

fn check_header(path: &Path, header: &SnapshotHeader, actual: u64) -> Result<(), SnapshotError> {
    header
        .validate(actual)
        .map_err(|e| SnapshotError::format(path, e))?;
    if header.block_count == 0 || header.bktrace_depth == 0 {
        return Err(SnapshotError::Empty(path.to_path_buf()));
    }
    Ok(())
}

fn add_symbol_record(table: &mut SymbolTable, addr: u64, name: &str) {
    if !name.is_empty() && addr > INVALID_ADDRESS {
        table.add_symbol(addr, name);
    }
}

fn ingest(file: SnapshotFile, table: &mut SymbolTable) -> LoadedBlocks {
    for symbol in &file.symbols {
        add_symbol_record(table, symbol.addr, &symbol.name);
    }
    for bktrace in &file.backtraces {
        table.add_backtrace(bktrace.hash, &bktrace.frames);
    }

    let mut blocks: Vec<MemoryBlock> = file.blocks.into_iter().map(MemoryBlock::from).collect();
    blocks.sort_unstable_by_key(|b| b.order_no);

    let mut by_bktrace: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (index, block) in blocks.iter().enumerate() {
        by_bktrace.entry(block.bktrace_hash).or_default().push(index);
    }

    LoadedBlocks { blocks, by_bktrace }
}
