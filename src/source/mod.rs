//! Input discovery, decompression, and archiving.
//!
//! Input batches are gzip-compressed TSV files matched by a glob pattern.
//! A processed file is archived by renaming it with a `.` prefix in place;
//! archived files are never matched again.

use globset::Glob;
use snafu::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::emit;
use crate::error::{
    ConfigSnafu, DecompressJoinSnafu, DecompressSnafu, IngestError, InvalidPatternSnafu,
    ListSourceSnafu, PipelineError, ReadSourceSnafu,
};
use crate::metrics::events::BytesRead;

/// List files matching `pattern`, skipping already-archived (dot-prefixed)
/// entries. The result is sorted for a stable processing order.
///
/// The pattern's directory part is listed literally; only the file-name
/// part is glob-matched (e.g. `/var/data/appsinstalled/*.tsv.gz`).
pub async fn discover_files(pattern: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let pattern_path = Path::new(pattern);
    let dir = match pattern_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name_pattern = pattern_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let matcher = Glob::new(&name_pattern)
        .context(InvalidPatternSnafu { pattern })
        .context(ConfigSnafu)?
        .compile_matcher();

    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .context(ListSourceSnafu { dir: dir.clone() })?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .context(ListSourceSnafu { dir: dir.clone() })?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || !matcher.is_match(name.as_ref()) {
            continue;
        }
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

/// Read and decompress one input file, returning its lines.
///
/// The whole file is read into memory and inflated on the blocking thread
/// pool. Lines are recovered permissively (lossy UTF-8, tolerant of a
/// trailing carriage return); content problems belong to the per-line
/// decoder, not to file ingestion.
pub async fn read_lines(path: &Path) -> Result<Vec<String>, IngestError> {
    let compressed = tokio::fs::read(path)
        .await
        .context(ReadSourceSnafu { path })?;
    emit!(BytesRead {
        bytes: compressed.len() as u64,
    });

    let inflated = tokio::task::spawn_blocking(move || {
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf)?;
        Ok::<_, std::io::Error>(buf)
    })
    .await
    .context(DecompressJoinSnafu { path })?
    .context(DecompressSnafu { path })?;

    let mut lines: Vec<String> = inflated
        .split(|&b| b == b'\n')
        .map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            String::from_utf8_lossy(line).into_owned()
        })
        .collect();

    // a trailing newline is an artifact, not an empty record
    if lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    Ok(lines)
}

/// Rename `path` to its dot-prefixed sibling, marking it consumed.
///
/// Returns the archived path. Callers treat an error as non-fatal.
pub async fn archive_file(path: &Path) -> std::io::Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| std::io::Error::other("path has no file name"))?;
    let archived = path.with_file_name(format!(".{}", name.to_string_lossy()));
    tokio::fs::rename(path, &archived).await?;
    Ok(archived)
}
