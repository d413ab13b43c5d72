use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

/// Writes raw page content of failed attempts for later inspection.
///
/// Every method is best effort: errors are logged and swallowed so a full
/// disk never stops the run.
pub struct DumpWriter {
    dir: Option<PathBuf>,
}

impl DumpWriter {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// Dump file for a record, named after its job key when it has one.
    pub fn path_for(&self, key: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("failed-{}.html", dump_key(key))))
    }

    pub fn write(&self, key: &str, content: &str) -> Option<PathBuf> {
        let path = self.path_for(key)?;

        if path.exists() {
            info!(
                "overwriting earlier dump for {} at {}",
                key,
                path.display()
            );
        }

        match write_dump(&path, content) {
            Ok(()) => {
                debug!("saved {} bytes of page content to {}", content.len(), path.display());
                Some(path)
            }
            Err(e) => {
                warn!("failed to save page dump to {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn write_dump(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

/// Converts a job key or URL into a safe, stable file name stem.
fn dump_key(key: &str) -> String {
    let stripped = key
        .trim_start_matches("https://")
        .trim_start_matches("http://");

    let mut slug: String = stripped
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    slug.truncate(120);

    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_deterministic_and_safe() {
        let writer = DumpWriter::new(Some(PathBuf::from("debug")));
        let a = writer.path_for("abc123").unwrap();
        assert_eq!(a, PathBuf::from("debug/failed-abc123.html"));

        let b = writer
            .path_for("https://example.com/jobs?id=9&ref=x")
            .unwrap();
        assert_eq!(b, PathBuf::from("debug/failed-example_com_jobs_id_9_ref_x.html"));
    }

    #[test]
    fn writes_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DumpWriter::new(Some(dir.path().join("dumps")));

        let first = writer.write("abc123", "<html>one</html>").unwrap();
        let second = writer.write("abc123", "<html>two</html>").unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&second).unwrap(), "<html>two</html>");
    }

    #[test]
    fn disabled_writer_is_a_no_op() {
        let writer = DumpWriter::disabled();
        assert!(writer.write("abc123", "<html/>").is_none());
    }

    #[test]
    fn unwritable_dir_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let writer = DumpWriter::new(Some(blocker.join("nested")));
        assert!(writer.write("abc123", "<html/>").is_none());
    }
}
