//! Sampled row-count estimation, used to seed the progress reporter's total.
//!
//! Grounded on `utils/zip_metadata.py::estimate_total_lines`: counting every
//! row of every shard is wasted work once a family has many shards, so a
//! family with three or fewer shards is counted exactly and a larger
//! family's total is extrapolated as `first + second * (n - 1)` — the first
//! shard counted exactly, every remaining shard assumed to match the
//! second.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use cnpj_core::{CnpjError, Result};

/// Sums a sampled row-count estimate across every archive family under `dir`.
pub fn estimate_total_rows(dir: &Path) -> Result<u64> {
    let mut by_family: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for entry in list_zip_files(dir)? {
        let stem = entry.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let family = stem.trim_end_matches(|c: char| c.is_ascii_digit()).to_ascii_lowercase();
        by_family.entry(family).or_default().push(entry);
    }

    let mut total = 0u64;
    for (_family, mut shards) in by_family {
        shards.sort();
        if shards.len() <= 3 {
            for shard in &shards {
                total += count_lines(shard)?;
            }
        } else {
            let first = count_lines(&shards[0])?;
            let second = count_lines(&shards[1])?;
            total += first + second * (shards.len() as u64 - 1);
        }
    }
    Ok(total)
}

fn count_lines(path: &Path) -> Result<u64> {
    let file = std::fs::File::open(path)?;
    let mut zip = zip::ZipArchive::new(file).map_err(zip_err)?;
    if zip.len() == 0 {
        return Ok(0);
    }
    let mut member = zip.by_index(0).map_err(zip_err)?;
    let mut buf = Vec::with_capacity(member.size() as usize);
    member.read_to_end(&mut buf)?;
    Ok(buf.iter().filter(|&&b| b == b'\n').count() as u64)
}

fn zip_err(e: zip::result::ZipError) -> CnpjError {
    CnpjError::Other(anyhow::anyhow!(e))
}

fn list_zip_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("zip")).unwrap_or(false) {
            out.push(path);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(dir: &Path, name: &str, lines: usize) {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("DATA", zip::write::FileOptions::default()).unwrap();
        for i in 0..lines {
            writeln!(zip, "{i};field").unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn small_family_is_counted_exactly() {
        let dir = tempfile::tempdir().unwrap();
        write_zip(dir.path(), "Cnaes0.zip", 10);
        write_zip(dir.path(), "Cnaes1.zip", 20);
        assert_eq!(estimate_total_rows(dir.path()).unwrap(), 30);
    }

    #[test]
    fn large_family_extrapolates_from_first_two_shards() {
        let dir = tempfile::tempdir().unwrap();
        // 5 shards: only the first two (10 and 20 lines) are sampled; the
        // first is counted exactly, the remaining three are assumed to
        // match the second: 10 + 20 * 4 = 90.
        write_zip(dir.path(), "Estabelecimentos0.zip", 10);
        write_zip(dir.path(), "Estabelecimentos1.zip", 20);
        for i in 2..5 {
            write_zip(dir.path(), &format!("Estabelecimentos{i}.zip"), 999);
        }
        assert_eq!(estimate_total_rows(dir.path()).unwrap(), 90);
    }

    #[test]
    fn empty_directory_yields_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(estimate_total_rows(dir.path()).unwrap(), 0);
    }
}
