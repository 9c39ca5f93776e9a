use glob::{glob_with, MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File pattern matched inside the input directory.
pub const RASTER_PATTERN: &str = "*.tif";

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("invalid input pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// An input raster and the name it is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub name: String,
    pub path: PathBuf,
}

impl Raster {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }
}

/// Finds all rasters directly inside `dir` (no recursion).
///
/// Dot-files are not matched, the same as a shell glob. A directory that
/// does not exist simply yields no rasters.
pub fn discover_rasters<P: AsRef<Path>>(dir: P) -> Result<Vec<Raster>, DiscoveryError> {
    let escaped = Pattern::escape(&dir.as_ref().to_string_lossy());
    let pattern = Path::new(&escaped).join(RASTER_PATTERN);
    let pattern = pattern.to_string_lossy();

    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };

    let paths = glob_with(&pattern, options).map_err(|source| DiscoveryError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut rasters = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => rasters.push(Raster::new(path)),
            Ok(path) => tracing::debug!(path = %path.display(), "skipping non-file match"),
            Err(e) => tracing::warn!("unreadable input entry: {}", e),
        }
    }

    Ok(rasters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_discovers_only_tif_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.tif"), b"a").unwrap();
        fs::write(dir.path().join("b.tif"), b"b").unwrap();
        fs::write(dir.path().join("c.tiff"), b"c").unwrap();
        fs::write(dir.path().join("d.png"), b"d").unwrap();
        fs::write(dir.path().join(".hidden.tif"), b"h").unwrap();
        fs::create_dir(dir.path().join("nested.tif")).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("e.tif"), b"e").unwrap();

        let mut names: Vec<String> = discover_rasters(dir.path())
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.tif", "b.tif"]);
    }

    #[test]
    fn test_raster_name_is_base_filename() {
        let raster = Raster::new("/data/input_rasters/dem.tif");
        assert_eq!(raster.name, "dem.tif");
        assert_eq!(raster.path, PathBuf::from("/data/input_rasters/dem.tif"));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let rasters = discover_rasters(dir.path().join("nope")).unwrap();
        assert!(rasters.is_empty());
    }

    #[test]
    fn test_directory_with_glob_characters() {
        let dir = TempDir::new().unwrap();
        let odd = dir.path().join("run[1]");
        fs::create_dir(&odd).unwrap();
        fs::write(odd.join("x.tif"), b"x").unwrap();

        let rasters = discover_rasters(&odd).unwrap();
        assert_eq!(rasters.len(), 1);
        assert_eq!(rasters[0].name, "x.tif");
    }
}
