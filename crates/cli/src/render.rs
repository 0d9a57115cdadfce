use std::ffi::OsStr;
use std::io::{self, Write};

use memprof_core::views::{BlockGroup, CallTree, CallTreeDiff, DiffSide, GroupKey};
use memprof_core::{ProfilingSession, SymbolTable};

const FRAMES_PER_GROUP: usize = 4;

/// Bytes with a binary unit, one decimal above 1 KiB.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn format_delta(left: u64, right: u64) -> String {
    if right >= left {
        format!("+{}", format_size(right - left))
    } else {
        format!("-{}", format_size(left - right))
    }
}

pub fn write_info<W: Write>(out: &mut W, session: &ProfilingSession) -> io::Result<()> {
    let device = session.device_info();
    writeln!(out, "log:       {}", session.memory_log_file().display())?;
    writeln!(out, "device:    {} ({} {})", device.name, device.manufacturer, device.model)?;
    writeln!(out, "platform:  {} {}", device.platform, device.version)?;
    writeln!(out, "app:       {}", device.app_name)?;

    let pools: Vec<&str> = session.stat_config().pool_names.iter().map(String::as_str).collect();
    let tags: Vec<&str> = session.stat_config().tag_names.iter().map(String::as_str).collect();
    writeln!(out, "pools:     {}", pools.join(", "))?;
    writeln!(out, "tags:      {}", tags.join(", "))?;

    writeln!(out, "stat items: {}", session.stat_count())?;
    if let (Some(first), Some(last)) = (session.stat(0), session.last_stat()) {
        let total = last.total().map_or(0, |t| u64::from(t.alloc_by_app));
        writeln!(
            out,
            "  {} .. {}, last total {}",
            first.timestamp,
            last.timestamp,
            format_size(total)
        )?;
    }

    writeln!(out, "snapshots: {}", session.snapshot_count())?;
    for (index, snapshot) in session.snapshots().iter().enumerate() {
        let name = snapshot
            .path()
            .file_name()
            .map(OsStr::to_string_lossy)
            .unwrap_or_default();
        writeln!(
            out,
            "  [{index}] {name}  t={}  {} blocks  {} symbols  {}",
            snapshot.timestamp(),
            snapshot.block_count(),
            snapshot.symbol_count(),
            format_size(snapshot.total_size())
        )?;
    }
    Ok(())
}

pub fn write_tree<W: Write>(
    out: &mut W,
    tree: &CallTree,
    max_depth: Option<usize>,
) -> io::Result<()> {
    if tree.is_empty() {
        return writeln!(out, "(no allocations under the given roots)");
    }
    for (id, depth) in tree.walk().into_iter().skip(1) {
        if max_depth.is_some_and(|max| depth > max) {
            continue;
        }
        let node = tree.node(id);
        writeln!(
            out,
            "{:indent$}{}  {} in {} blocks",
            "",
            node.name_str(),
            format_size(node.alloc_by_app),
            node.block_count,
            indent = 2 * (depth - 1)
        )?;
    }
    Ok(())
}

pub fn write_diff<W: Write>(
    out: &mut W,
    diff: &CallTreeDiff,
    left: &CallTree,
    right: &CallTree,
    max_depth: Option<usize>,
) -> io::Result<()> {
    for (id, depth) in diff.walk().into_iter().skip(1) {
        if max_depth.is_some_and(|max| depth > max) {
            continue;
        }
        let node = diff.node(id);
        let l = node.left.map_or(0, |b| left.node(b).alloc_by_app);
        let r = node.right.map_or(0, |b| right.node(b).alloc_by_app);
        let marker = match node.side() {
            DiffSide::Both | DiffSide::Root => ' ',
            DiffSide::LeftOnly => '-',
            DiffSide::RightOnly => '+',
        };
        writeln!(
            out,
            "{marker} {:indent$}{}  {} -> {} ({})",
            "",
            node.name_str(),
            format_size(l),
            format_size(r),
            format_delta(l, r),
            indent = 2 * (depth - 1)
        )?;
    }
    Ok(())
}

pub fn write_groups<W: Write>(
    out: &mut W,
    groups: &[BlockGroup<'_>],
    key: GroupKey,
    table: &SymbolTable,
    limit: usize,
) -> io::Result<()> {
    // The total group is not counted against the limit.
    let shown = limit.saturating_add(1);
    for group in groups.iter().take(shown) {
        let link = &group.link;
        if link.is_diff() {
            writeln!(
                out,
                "{}: {} blocks, {} -> {} ({}), {} in both",
                group.title,
                link.len(),
                format_size(link.alloc_size[0]),
                format_size(link.alloc_size[1]),
                format_delta(link.alloc_size[0], link.alloc_size[1]),
                link.paired
            )?;
        } else {
            writeln!(
                out,
                "{}: {} blocks, {}",
                group.title,
                link.len(),
                format_size(link.alloc_size[0])
            )?;
        }

        if key == GroupKey::Backtrace && !group.is_total() {
            let frames = table.backtrace_symbols(group.key).unwrap_or_default();
            for frame in frames.iter().take(FRAMES_PER_GROUP) {
                writeln!(out, "    at {frame}")?;
            }
            if frames.len() > FRAMES_PER_GROUP {
                writeln!(out, "    ... {} more", frames.len() - FRAMES_PER_GROUP)?;
            }
        }
    }
    if groups.len() > shown {
        writeln!(out, "({} more groups)", groups.len() - shown)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_pick_a_unit() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn deltas_carry_a_sign() {
        assert_eq!(format_delta(100, 300), "+200 B");
        assert_eq!(format_delta(300, 100), "-200 B");
    }

    #[test]
    fn empty_tree_says_so() {
        let mut out = Vec::new();
        write_tree(&mut out, &CallTree::new(), None).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "(no allocations under the given roots)\n"
        );
    }

    fn size_group(title: &str, total: bool) -> BlockGroup<'static> {
        BlockGroup {
            title: title.to_string(),
            key: 0,
            link: Default::default(),
            total,
        }
    }

    #[test]
    fn group_limit_excludes_the_total() {
        let groups = [
            size_group("Total", true),
            size_group("block size=64", false),
            size_group("block size=16", false),
        ];
        let table = SymbolTable::new();

        let mut out = Vec::new();
        write_groups(&mut out, &groups, GroupKey::Size, &table, 1).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("block size=64"));
        assert!(!text.contains("block size=16"));
        assert!(text.ends_with("(1 more groups)\n"));

        let mut out = Vec::new();
        write_groups(&mut out, &groups, GroupKey::Size, &table, usize::MAX).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
    }
}
