//! Records of the append-only session log.
//!
//! Layout: [`LogHeader`], device descriptor blob, [`StatConfig`] blob, then a
//! run of [`StatItem`]s whose size is fixed by the config.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::codec::{ensure_len, read_fixed_str, write_fixed_str};
use crate::error::FormatError;

pub const LOG_SIGNATURE: u32 = 0x4176_4144;
pub const LOG_HEADER_SIZE: usize = 32;
pub const STAT_CONFIG_HEADER_SIZE: usize = 16;
pub const ITEM_NAME_LEN: usize = 32;
pub const STAT_ITEM_HEADER_SIZE: usize = 40;
pub const POOL_STAT_SIZE: usize = 16;
pub const TAG_STAT_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogHeader {
    pub stat_count: u32,
    /// Set once the writer shut down cleanly.
    pub finished: bool,
    pub dev_info_size: u32,
    pub stat_config_size: u32,
    pub stat_item_size: u32,
}

impl LogHeader {
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        let signature = reader.read_u32::<LittleEndian>()?;
        if signature != LOG_SIGNATURE {
            return Err(FormatError::BadSignature {
                expected: LOG_SIGNATURE,
                found: signature,
            });
        }
        let stat_count = reader.read_u32::<LittleEndian>()?;
        let finished = reader.read_u32::<LittleEndian>()? != 0;
        let dev_info_size = reader.read_u32::<LittleEndian>()?;
        let stat_config_size = reader.read_u32::<LittleEndian>()?;
        let stat_item_size = reader.read_u32::<LittleEndian>()?;
        let _padding = reader.read_u64::<LittleEndian>()?;
        Ok(Self {
            stat_count,
            finished,
            dev_info_size,
            stat_config_size,
            stat_item_size,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(LOG_SIGNATURE)?;
        writer.write_u32::<LittleEndian>(self.stat_count)?;
        writer.write_u32::<LittleEndian>(u32::from(self.finished))?;
        writer.write_u32::<LittleEndian>(self.dev_info_size)?;
        writer.write_u32::<LittleEndian>(self.stat_config_size)?;
        writer.write_u32::<LittleEndian>(self.stat_item_size)?;
        writer.write_u64::<LittleEndian>(0)
    }

    /// Offset of the first stat item.
    pub fn items_offset(&self) -> u64 {
        LOG_HEADER_SIZE as u64 + u64::from(self.dev_info_size) + u64::from(self.stat_config_size)
    }
}

/// Names of the allocation pools and tags registered by the profiled process.
///
/// Pool 0 is conventionally the total over all pools.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatConfig {
    pub pool_names: Vec<String>,
    pub tag_names: Vec<String>,
}

impl StatConfig {
    pub fn new(pool_names: Vec<String>, tag_names: Vec<String>) -> Self {
        Self {
            pool_names,
            tag_names,
        }
    }

    pub fn encoded_size(&self) -> usize {
        STAT_CONFIG_HEADER_SIZE + ITEM_NAME_LEN * (self.pool_names.len() + self.tag_names.len())
    }

    /// Size of one stat item produced under this config.
    pub fn item_size(&self) -> usize {
        stat_item_size(self.pool_names.len(), self.tag_names.len())
    }

    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        ensure_len(data, STAT_CONFIG_HEADER_SIZE as u64)?;
        let mut cursor = data;
        let size = cursor.read_u32::<LittleEndian>()? as usize;
        let pool_count = cursor.read_u32::<LittleEndian>()? as usize;
        let tag_count = cursor.read_u32::<LittleEndian>()? as usize;
        let _reserved = cursor.read_u32::<LittleEndian>()?;

        let expected = STAT_CONFIG_HEADER_SIZE + ITEM_NAME_LEN * (pool_count + tag_count);
        if size != expected {
            return Err(FormatError::Layout(format!(
                "stat config is {size} bytes, {} names need {expected}",
                pool_count + tag_count
            )));
        }
        ensure_len(data, expected as u64)?;

        let pool_names = (0..pool_count)
            .map(|_| read_fixed_str(&mut cursor, ITEM_NAME_LEN))
            .collect::<io::Result<Vec<_>>>()?;
        let tag_names = (0..tag_count)
            .map(|_| read_fixed_str(&mut cursor, ITEM_NAME_LEN))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            pool_names,
            tag_names,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.encoded_size() as u32)?;
        writer.write_u32::<LittleEndian>(self.pool_names.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.tag_names.len() as u32)?;
        writer.write_u32::<LittleEndian>(0)?;
        for name in self.pool_names.iter().chain(&self.tag_names) {
            write_fixed_str(writer, name, ITEM_NAME_LEN)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_size());
        let _ = self.write_to(&mut out);
        out
    }
}

pub fn stat_item_size(pool_count: usize, tag_count: usize) -> usize {
    STAT_ITEM_HEADER_SIZE + POOL_STAT_SIZE * pool_count + TAG_STAT_SIZE * tag_count
}

/// Allocator-wide counters that do not belong to any pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GeneralStat {
    pub alloc_internal: u32,
    pub internal_block_count: u32,
    pub ghost_block_count: u32,
    pub ghost_size: u32,
    pub real_size: u32,
    pub total_block_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStat {
    pub alloc_by_app: u32,
    pub alloc_total: u32,
    pub block_count: u32,
    pub max_block_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TagStat {
    pub alloc_by_app: u32,
    pub block_count: u32,
}

/// One sample of memory consumption, used for trend charts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatItem {
    pub timestamp: u64,
    pub general: GeneralStat,
    pub pools: Vec<PoolStat>,
    pub tags: Vec<TagStat>,
}

impl StatItem {
    /// Parse one item laid out for `pool_count` pools and `tag_count` tags.
    ///
    /// `data` may be longer than one item; only the first item is consumed.
    pub fn parse(data: &[u8], pool_count: usize, tag_count: usize) -> Result<Self, FormatError> {
        let expected = stat_item_size(pool_count, tag_count);
        ensure_len(data, expected as u64)?;
        let mut cursor = data;

        let timestamp = cursor.read_u64::<LittleEndian>()?;
        let size = cursor.read_u32::<LittleEndian>()? as usize;
        if size != expected {
            return Err(FormatError::Layout(format!(
                "stat item declares {size} bytes, expected {expected}"
            )));
        }
        let _reserved = cursor.read_u32::<LittleEndian>()?;
        let general = GeneralStat {
            alloc_internal: cursor.read_u32::<LittleEndian>()?,
            internal_block_count: cursor.read_u32::<LittleEndian>()?,
            ghost_block_count: cursor.read_u32::<LittleEndian>()?,
            ghost_size: cursor.read_u32::<LittleEndian>()?,
            real_size: cursor.read_u32::<LittleEndian>()?,
            total_block_count: cursor.read_u32::<LittleEndian>()?,
        };

        let mut pools = Vec::with_capacity(pool_count);
        for _ in 0..pool_count {
            pools.push(PoolStat {
                alloc_by_app: cursor.read_u32::<LittleEndian>()?,
                alloc_total: cursor.read_u32::<LittleEndian>()?,
                block_count: cursor.read_u32::<LittleEndian>()?,
                max_block_size: cursor.read_u32::<LittleEndian>()?,
            });
        }
        let mut tags = Vec::with_capacity(tag_count);
        for _ in 0..tag_count {
            tags.push(TagStat {
                alloc_by_app: cursor.read_u32::<LittleEndian>()?,
                block_count: cursor.read_u32::<LittleEndian>()?,
            });
        }

        Ok(Self {
            timestamp,
            general,
            pools,
            tags,
        })
    }

    pub fn encoded_size(&self) -> usize {
        stat_item_size(self.pools.len(), self.tags.len())
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.timestamp)?;
        writer.write_u32::<LittleEndian>(self.encoded_size() as u32)?;
        writer.write_u32::<LittleEndian>(0)?;
        let g = &self.general;
        for v in [
            g.alloc_internal,
            g.internal_block_count,
            g.ghost_block_count,
            g.ghost_size,
            g.real_size,
            g.total_block_count,
        ] {
            writer.write_u32::<LittleEndian>(v)?;
        }
        for pool in &self.pools {
            writer.write_u32::<LittleEndian>(pool.alloc_by_app)?;
            writer.write_u32::<LittleEndian>(pool.alloc_total)?;
            writer.write_u32::<LittleEndian>(pool.block_count)?;
            writer.write_u32::<LittleEndian>(pool.max_block_size)?;
        }
        for tag in &self.tags {
            writer.write_u32::<LittleEndian>(tag.alloc_by_app)?;
            writer.write_u32::<LittleEndian>(tag.block_count)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_size());
        let _ = self.write_to(&mut out);
        out
    }

    /// Total consumption, i.e. the stat of pool 0.
    pub fn total(&self) -> Option<&PoolStat> {
        self.pools.first()
    }
}
