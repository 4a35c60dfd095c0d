//! Copying photos into output folders without clobbering existing files.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

const MAX_SUFFIX: u32 = 10_000;

/// Where a photo ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    /// Output folder (person name or `unknown`).
    pub folder: String,
    pub file_name: String,
    pub path: PathBuf,
    /// An identical file was already there, nothing was copied.
    pub reused: bool,
}

/// Reduce an uploaded or source file name to a safe single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "photo".to_string()
    } else {
        cleaned
    }
}

/// Copy `source` into `<root>/<folder>/` under `file_name`.
///
/// An identical file already at the destination is reused; a different file
/// with the same name gets a `-<n>` suffix before the extension.
pub fn place(source: &Path, root: &Path, folder: &str, file_name: &str) -> io::Result<Placement> {
    let dir = root.join(folder);
    fs::create_dir_all(&dir)?;

    let file_name = sanitize_file_name(file_name);
    let (stem, ext) = split_name(&file_name);
    let mut source_digest = None;

    for n in 0..MAX_SUFFIX {
        let candidate = if n == 0 {
            file_name.clone()
        } else {
            match ext {
                Some(ext) => format!("{stem}-{n}.{ext}"),
                None => format!("{stem}-{n}"),
            }
        };
        let dest = dir.join(&candidate);

        if !dest.exists() {
            fs::copy(source, &dest)?;
            return Ok(Placement {
                folder: folder.to_string(),
                file_name: candidate,
                path: dest,
                reused: false,
            });
        }

        let wanted = match source_digest {
            Some(d) => d,
            None => *source_digest.insert(file_digest(source)?),
        };
        if file_digest(&dest)? == wanted {
            return Ok(Placement {
                folder: folder.to_string(),
                file_name: candidate,
                path: dest,
                reused: true,
            });
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {file_name} in {}", dir.display()),
    ))
}

fn split_name(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    }
}

/// SHA-256 of a file's contents.
pub fn file_digest(path: &Path) -> io::Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hasher.finalize().into())
}
