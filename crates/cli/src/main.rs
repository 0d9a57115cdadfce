mod args;
mod render;

use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use clap::Parser;
use memprof_core::views::{BlockFilter, BlockLink, CallTreeDiff, GroupKey, group_blocks};
use memprof_core::{ProfilingSession, SessionConfig};
use tracing::Level;

use crate::args::{Commands, Opt};

fn main() -> Result<()> {
    let opt = Opt::parse();

    tracing_subscriber::fmt()
        .with_max_level(if opt.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(io::stderr)
        .init();

    let config = match &opt.config {
        Some(path) => SessionConfig::from_path(path)?,
        None => SessionConfig::default(),
    };
    let mut session = ProfilingSession::new(config);
    session
        .load_from_file(&opt.log)
        .with_context(|| format!("cannot open session {}", opt.log.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match opt.command {
        Commands::Info => render::write_info(&mut out, &session)?,
        Commands::Tree {
            snapshot,
            roots,
            depth,
        } => {
            let index = find_snapshot(&session, &snapshot)?;
            session.load_snapshot(index)?;
            let roots = resolve_roots(&session, &roots)?;
            let tree = session.create_branch(index, &roots)?;
            render::write_tree(&mut out, &tree, depth)?;
        }
        Commands::Diff {
            left,
            right,
            roots,
            depth,
        } => {
            let (l, r) = (find_snapshot(&session, &left)?, find_snapshot(&session, &right)?);
            session.load_snapshot(l)?;
            session.load_snapshot(r)?;
            let roots = resolve_roots(&session, &roots)?;
            let left = session.create_branch(l, &roots)?;
            let right = session.create_branch(r, &roots)?;
            let diff = CallTreeDiff::create(&left, &right);
            render::write_diff(&mut out, &diff, &left, &right, depth)?;
        }
        Commands::Blocks {
            snapshot,
            against,
            group,
            min_order,
            new_only,
            limit,
        } => {
            let l = find_snapshot(&session, &snapshot)?;
            session.load_snapshot(l)?;
            let r = match against {
                Some(other) => {
                    let r = find_snapshot(&session, &other)?;
                    session.load_snapshot(r)?;
                    Some(r)
                }
                None => None,
            };

            let snapshots = session.snapshots();
            let link = match r {
                Some(r) => BlockLink::from_snapshots(&snapshots[l], &snapshots[r]),
                None => BlockLink::from_snapshot(&snapshots[l]),
            };
            let filter = BlockFilter {
                min_order,
                hide_same: new_only,
                ..BlockFilter::default()
            };
            let key = GroupKey::from(group);
            let groups = group_blocks(&link, key, &filter);
            render::write_groups(&mut out, &groups, key, session.symbol_table(), limit)?;
        }
    }
    out.flush()?;

    session.finish()?;
    Ok(())
}

/// Accept either an index into the timestamp-ordered snapshot list or a
/// snapshot file name.
fn find_snapshot(session: &ProfilingSession, arg: &str) -> Result<usize> {
    if let Ok(index) = arg.parse::<usize>() {
        if index < session.snapshot_count() {
            return Ok(index);
        }
        bail!(
            "snapshot index {index} out of range, session has {}",
            session.snapshot_count()
        );
    }
    session
        .snapshots()
        .iter()
        .position(|s| s.path().file_name().is_some_and(|n| n == arg))
        .with_context(|| format!("no snapshot named {arg}"))
}

fn resolve_roots(
    session: &ProfilingSession,
    names: &[String],
) -> Result<Vec<memprof_core::Symbol>> {
    let roots = session.resolve_names(names);
    if roots.is_empty() {
        bail!("none of {} appears in any backtrace", names.join(", "));
    }
    Ok(roots)
}
