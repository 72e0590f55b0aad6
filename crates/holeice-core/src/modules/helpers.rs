use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const GLOB_METACHARACTERS: [char; 4] = ['*', '?', '[', '{'];

pub fn read_lossy(path: &Path) -> Option<String> {
    fs::read(path)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

pub fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Sorted `/`-separated paths of every file below `root`, or `None` when the
/// root does not exist.
pub fn collect_relative_files(root: &Path) -> io::Result<Option<Vec<String>>> {
    if !root.exists() {
        return Ok(None);
    }

    let mut results = Vec::new();
    collect_relative_files_recursive(root, root, &mut results)?;
    results.sort();
    Ok(Some(results))
}

fn collect_relative_files_recursive(
    root: &Path,
    current_dir: &Path,
    results: &mut Vec<String>,
) -> io::Result<()> {
    for entry in fs::read_dir(current_dir)? {
        let entry = entry?;
        let entry_path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_relative_files_recursive(root, &entry_path, results)?;
            continue;
        }

        if file_type.is_file() {
            let relative_path = entry_path
                .strip_prefix(root)
                .unwrap_or(&entry_path)
                .to_string_lossy()
                .replace('\\', "/");
            results.push(relative_path);
        }
    }

    Ok(())
}

pub fn build_glob_set(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}

pub fn is_path_pattern(path: &Path) -> bool {
    path.to_string_lossy().contains(GLOB_METACHARACTERS)
}

/// Existing paths matching `pattern`, where any component may be a glob as
/// in `simulation/results/*/*`. Each glob matches one level only.
pub fn expand_path_pattern(pattern: &Path) -> io::Result<Vec<PathBuf>> {
    let mut matches = vec![PathBuf::new()];
    for component in pattern.components() {
        let text = component.as_os_str().to_string_lossy();
        if !text.contains(GLOB_METACHARACTERS) {
            for path in &mut matches {
                path.push(component);
            }
            continue;
        }

        let matcher = Glob::new(&text)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?
            .compile_matcher();
        let mut next = Vec::new();
        for dir in &matches {
            let listed = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
            let entries = match fs::read_dir(listed) {
                Ok(entries) => entries,
                Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
                Err(error) if error.kind() == io::ErrorKind::NotADirectory => continue,
                Err(error) => return Err(error),
            };
            for entry in entries {
                let entry = entry?;
                if matcher.is_match(entry.file_name()) {
                    next.push(entry.path());
                }
            }
        }
        next.sort();
        matches = next;
    }
    matches.retain(|path| path.exists());
    Ok(matches)
}

/// Moves a file or directory, copying when a rename crosses filesystems.
pub fn move_path(source: &Path, destination: &Path) -> io::Result<()> {
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }

    copy_recursively(source, destination)?;
    if source.is_dir() {
        fs::remove_dir_all(source)
    } else {
        fs::remove_file(source)
    }
}

fn copy_recursively(source: &Path, destination: &Path) -> io::Result<()> {
    if !source.is_dir() {
        fs::copy(source, destination)?;
        return Ok(());
    }

    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        copy_recursively(&entry.path(), &destination.join(entry.file_name()))?;
    }
    Ok(())
}

/// Removes everything inside `dir` and leaves the directory in place.
pub fn clear_directory(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        return fs::create_dir_all(dir);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
