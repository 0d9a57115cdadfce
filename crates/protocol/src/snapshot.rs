use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::codec::{ensure_len, read_fixed_str, write_fixed_str};
use crate::error::FormatError;

/// "SNAP" in little-endian byte order.
pub const SNAPSHOT_SIGNATURE: u32 = 0x5041_4E53;
pub const SNAPSHOT_HEADER_SIZE: usize = 48;
pub const BLOCK_RECORD_SIZE: usize = 24;
pub const SYMBOL_NAME_LEN: usize = 120;
pub const SYMBOL_RECORD_SIZE: usize = 8 + SYMBOL_NAME_LEN;
/// Hash plus padding; frame addresses follow.
pub const BACKTRACE_HEADER_SIZE: usize = 8;

/// Fixed header at the start of every snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Offset of the block array from the start of the file.
    pub data_offset: u32,
    /// Declared total file size in bytes.
    pub size: u64,
    pub timestamp: u64,
    pub block_count: u32,
    pub symbol_count: u32,
    pub bktrace_count: u32,
    /// Number of frame slots in every backtrace record.
    pub bktrace_depth: u32,
}

impl SnapshotHeader {
    /// Parse a header from the beginning of `data`, checking the signature.
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        ensure_len(data, SNAPSHOT_HEADER_SIZE as u64)?;
        let mut cursor = data;
        Self::read_from(&mut cursor)
    }

    /// Read a header from a stream positioned at the start of a snapshot.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        let signature = reader.read_u32::<LittleEndian>()?;
        if signature != SNAPSHOT_SIGNATURE {
            return Err(FormatError::BadSignature {
                expected: SNAPSHOT_SIGNATURE,
                found: signature,
            });
        }
        let data_offset = reader.read_u32::<LittleEndian>()?;
        let size = reader.read_u64::<LittleEndian>()?;
        let timestamp = reader.read_u64::<LittleEndian>()?;
        let block_count = reader.read_u32::<LittleEndian>()?;
        let symbol_count = reader.read_u32::<LittleEndian>()?;
        let bktrace_count = reader.read_u32::<LittleEndian>()?;
        let bktrace_depth = reader.read_u32::<LittleEndian>()?;
        let _reserved = reader.read_u64::<LittleEndian>()?;
        Ok(Self {
            data_offset,
            size,
            timestamp,
            block_count,
            symbol_count,
            bktrace_count,
            bktrace_depth,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(SNAPSHOT_SIGNATURE)?;
        writer.write_u32::<LittleEndian>(self.data_offset)?;
        writer.write_u64::<LittleEndian>(self.size)?;
        writer.write_u64::<LittleEndian>(self.timestamp)?;
        writer.write_u32::<LittleEndian>(self.block_count)?;
        writer.write_u32::<LittleEndian>(self.symbol_count)?;
        writer.write_u32::<LittleEndian>(self.bktrace_count)?;
        writer.write_u32::<LittleEndian>(self.bktrace_depth)?;
        writer.write_u64::<LittleEndian>(0)
    }

    /// Size in bytes of one backtrace record.
    pub fn backtrace_stride(&self) -> u64 {
        BACKTRACE_HEADER_SIZE as u64 + u64::from(self.bktrace_depth) * 8
    }

    /// Absolute offset of the symbol array.
    pub fn symbols_offset(&self) -> u64 {
        u64::from(self.data_offset) + u64::from(self.block_count) * BLOCK_RECORD_SIZE as u64
    }

    /// Bytes occupied by the block, symbol and backtrace arrays.
    pub fn payload_size(&self) -> Option<u64> {
        let blocks = u64::from(self.block_count) * BLOCK_RECORD_SIZE as u64;
        let symbols = u64::from(self.symbol_count) * SYMBOL_RECORD_SIZE as u64;
        let bktraces = self
            .backtrace_stride()
            .checked_mul(u64::from(self.bktrace_count))?;
        blocks.checked_add(symbols)?.checked_add(bktraces)
    }

    /// Check the header against the physical size of the file it came from.
    pub fn validate(&self, actual_size: u64) -> Result<(), FormatError> {
        if self.size != actual_size {
            return Err(FormatError::SizeMismatch {
                declared: self.size,
                actual: actual_size,
            });
        }
        if (self.data_offset as usize) < SNAPSHOT_HEADER_SIZE {
            return Err(FormatError::Layout(format!(
                "data offset {} overlaps the header",
                self.data_offset
            )));
        }
        let payload = self
            .payload_size()
            .ok_or_else(|| FormatError::Layout("record counts overflow".into()))?;
        let end = u64::from(self.data_offset)
            .checked_add(payload)
            .ok_or_else(|| FormatError::Layout("record counts overflow".into()))?;
        if end > self.size {
            return Err(FormatError::Truncated {
                needed: end,
                available: self.size,
            });
        }
        Ok(())
    }
}

/// One allocation as written by the profiled process.
///
/// `pool` is the raw pool index here; the analysis side turns it into a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockRecord {
    pub order_no: u32,
    pub alloc_by_app: u32,
    pub alloc_total: u32,
    pub bktrace_hash: u32,
    pub pool: u32,
    pub tags: u32,
}

impl BlockRecord {
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            order_no: reader.read_u32::<LittleEndian>()?,
            alloc_by_app: reader.read_u32::<LittleEndian>()?,
            alloc_total: reader.read_u32::<LittleEndian>()?,
            bktrace_hash: reader.read_u32::<LittleEndian>()?,
            pool: reader.read_u32::<LittleEndian>()?,
            tags: reader.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.order_no)?;
        writer.write_u32::<LittleEndian>(self.alloc_by_app)?;
        writer.write_u32::<LittleEndian>(self.alloc_total)?;
        writer.write_u32::<LittleEndian>(self.bktrace_hash)?;
        writer.write_u32::<LittleEndian>(self.pool)?;
        writer.write_u32::<LittleEndian>(self.tags)
    }
}

/// A resolved frame address and its function name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub addr: u64,
    pub name: String,
}

impl SymbolRecord {
    pub fn new(addr: u64, name: impl Into<String>) -> Self {
        Self {
            addr,
            name: name.into(),
        }
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let addr = reader.read_u64::<LittleEndian>()?;
        let name = read_fixed_str(reader, SYMBOL_NAME_LEN)?;
        Ok(Self { addr, name })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.addr)?;
        write_fixed_str(writer, &self.name, SYMBOL_NAME_LEN)
    }
}

/// A captured call stack, innermost frame first.
///
/// On disk every record has exactly `bktrace_depth` slots; unused slots are
/// zero, which readers treat as the end of the stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktraceRecord {
    pub hash: u32,
    pub frames: Vec<u64>,
}

impl BacktraceRecord {
    pub fn new(hash: u32, frames: Vec<u64>) -> Self {
        Self { hash, frames }
    }

    pub fn read_from<R: Read>(reader: &mut R, depth: u32) -> io::Result<Self> {
        let hash = reader.read_u32::<LittleEndian>()?;
        let _pad = reader.read_u32::<LittleEndian>()?;
        let mut frames = Vec::with_capacity(depth as usize);
        for _ in 0..depth {
            frames.push(reader.read_u64::<LittleEndian>()?);
        }
        Ok(Self { hash, frames })
    }

    /// Write the record padded (or cut) to `depth` frame slots.
    pub fn write_to<W: Write>(&self, writer: &mut W, depth: u32) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.hash)?;
        writer.write_u32::<LittleEndian>(0)?;
        for i in 0..depth as usize {
            writer.write_u64::<LittleEndian>(self.frames.get(i).copied().unwrap_or(0))?;
        }
        Ok(())
    }
}

/// A complete snapshot: header plus the three record arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub header: SnapshotHeader,
    pub blocks: Vec<BlockRecord>,
    pub symbols: Vec<SymbolRecord>,
    pub backtraces: Vec<BacktraceRecord>,
}

impl SnapshotFile {
    /// Assemble a snapshot and compute a matching header.
    pub fn new(
        timestamp: u64,
        bktrace_depth: u32,
        blocks: Vec<BlockRecord>,
        symbols: Vec<SymbolRecord>,
        backtraces: Vec<BacktraceRecord>,
    ) -> Self {
        let mut header = SnapshotHeader {
            data_offset: SNAPSHOT_HEADER_SIZE as u32,
            size: 0,
            timestamp,
            block_count: blocks.len() as u32,
            symbol_count: symbols.len() as u32,
            bktrace_count: backtraces.len() as u32,
            bktrace_depth,
        };
        header.size = SNAPSHOT_HEADER_SIZE as u64 + header.payload_size().unwrap_or(0);
        Self {
            header,
            blocks,
            symbols,
            backtraces,
        }
    }

    /// Parse a whole snapshot held in memory.
    ///
    /// The header must declare exactly `data.len()` bytes and every array
    /// must fit inside that size.
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        let header = SnapshotHeader::parse(data)?;
        header.validate(data.len() as u64)?;

        let mut cursor = &data[header.data_offset as usize..];
        let blocks = (0..header.block_count)
            .map(|_| BlockRecord::read_from(&mut cursor))
            .collect::<io::Result<Vec<_>>>()?;
        let symbols = (0..header.symbol_count)
            .map(|_| SymbolRecord::read_from(&mut cursor))
            .collect::<io::Result<Vec<_>>>()?;
        let backtraces = (0..header.bktrace_count)
            .map(|_| BacktraceRecord::read_from(&mut cursor, header.bktrace_depth))
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self {
            header,
            blocks,
            symbols,
            backtraces,
        })
    }

    /// Read only the symbol array, given a validated header and the file bytes.
    pub fn parse_symbols(
        header: &SnapshotHeader,
        data: &[u8],
    ) -> Result<Vec<SymbolRecord>, FormatError> {
        let start = header.symbols_offset();
        let len = u64::from(header.symbol_count) * SYMBOL_RECORD_SIZE as u64;
        ensure_len(data, start + len)?;
        let mut cursor = &data[start as usize..];
        Ok((0..header.symbol_count)
            .map(|_| SymbolRecord::read_from(&mut cursor))
            .collect::<io::Result<Vec<_>>>()?)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.header.write_to(writer)?;
        let padding = (self.header.data_offset as usize).saturating_sub(SNAPSHOT_HEADER_SIZE);
        writer.write_all(&vec![0u8; padding])?;
        for block in &self.blocks {
            block.write_to(writer)?;
        }
        for symbol in &self.symbols {
            symbol.write_to(writer)?;
        }
        for bktrace in &self.backtraces {
            bktrace.write_to(writer, self.header.bktrace_depth)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.size as usize);
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut out);
        out
    }
}
