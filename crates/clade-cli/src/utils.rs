pub mod progress;

use std::path::{Path, PathBuf};

/// Appends `suffix` to the file name of `prefix`, leaving any existing
/// extension in place, so `aln.fasta` + `.ckp` becomes `aln.fasta.ckp`.
pub fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    prefix.with_file_name(name)
}
