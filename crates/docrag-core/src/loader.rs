use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::SourceDocument;

/// Collects files under `root` (or `root` itself) whose extension is in `extensions`, sorted.
pub fn list_files(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let wanted = |path: &Path| {
        path.extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    };
    if root.is_file() {
        return if wanted(root) { vec![root.to_path_buf()] } else { Vec::new() };
    }
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
        let path = entry.path();
        if wanted(path) {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    files
}

/// Reads a text file, falling back to lossy UTF-8 decoding.
pub fn read_text(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => {
            let bytes = fs::read(path).map_err(|e| Error::NotFound(format!("{}: {e}", path.display())))?;
            Ok(String::from_utf8_lossy(&bytes).to_string())
        }
    }
}

pub fn load_document(path: &Path) -> Result<SourceDocument> {
    let text = read_text(path)?;
    Ok(SourceDocument::from_path(path, text))
}
