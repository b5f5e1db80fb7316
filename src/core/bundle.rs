use crate::domain::model::RunId;
use crate::utils::error::Result;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::{FileOptions, ZipWriter};

pub const CURRENT_FILE: &str = "current.xml";
pub const CANDIDATE_FILE: &str = "candidate.xml";

/// Working area of one update run: `<work_root>/<run id>/`.
#[derive(Debug)]
pub struct RunBundle {
    run_id: RunId,
    dir: PathBuf,
}

impl RunBundle {
    /// Creates the run directory. Fails if a bundle with the same run id already exists.
    pub fn create(work_root: &Path, run_id: RunId) -> Result<Self> {
        fs::create_dir_all(work_root)?;
        let dir = work_root.join(run_id.as_str());
        fs::create_dir(&dir)?;
        let dir = dir.canonicalize()?;
        Ok(Self { run_id, dir })
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_FILE)
    }

    pub fn candidate_path(&self) -> PathBuf {
        self.dir.join(CANDIDATE_FILE)
    }

    pub fn archive_name(&self) -> String {
        format!("lcr-{}.zip", self.run_id)
    }

    /// Deletes the working area.
    pub fn discard(self) -> Result<()> {
        fs::remove_dir_all(&self.dir)?;
        tracing::debug!("Removed working area {}", self.dir.display());
        Ok(())
    }

    /// Zips the working area into `<archive_dir>/lcr-<run id>.zip`, then deletes it.
    /// An existing archive is never replaced; on failure the working area stays.
    pub fn archive_into(self, archive_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(archive_dir)?;
        let archive_path = archive_dir.join(self.archive_name());

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&archive_path)?;
        if let Err(e) = self.write_zip(file) {
            let _ = fs::remove_file(&archive_path);
            return Err(e);
        }

        tracing::debug!("Wrote {}", archive_path.display());
        self.discard()?;
        Ok(archive_path)
    }

    fn write_zip(&self, file: File) -> Result<()> {
        let mut files = Vec::new();
        collect_files(&self.dir, &mut files)?;
        files.sort();

        let mut zip = ZipWriter::new(file);
        for path in files {
            let relative = path
                .strip_prefix(&self.dir)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let name = format!("{}/{}", self.run_id, relative);

            zip.start_file::<_, ()>(name, FileOptions::default())?;
            zip.write_all(&fs::read(&path)?)?;
        }
        zip.finish()?;
        Ok(())
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn run_id() -> RunId {
        use chrono::TimeZone;
        RunId::from_time(chrono::Local.with_ymd_and_hms(2026, 10, 16, 4, 0, 0).unwrap())
    }

    #[test]
    fn test_create_refuses_existing_run() {
        let root = TempDir::new().unwrap();
        let bundle = RunBundle::create(root.path(), run_id()).unwrap();
        assert!(bundle.dir().is_dir());
        assert!(RunBundle::create(root.path(), run_id()).is_err());
    }

    #[test]
    fn test_archive_contains_nested_files_and_removes_working_area() {
        let root = TempDir::new().unwrap();
        let archive_dir = root.path().join("archive");
        let bundle = RunBundle::create(&root.path().join("cache"), run_id()).unwrap();
        fs::write(bundle.current_path(), "<a/>").unwrap();
        fs::create_dir(bundle.dir().join("cache")).unwrap();
        fs::write(bundle.dir().join("cache").join("usa_festnetz.yaml"), "providers: {}").unwrap();
        let dir = bundle.dir().to_path_buf();

        let archive = bundle.archive_into(&archive_dir).unwrap();

        assert_eq!(archive, archive_dir.join("lcr-2026-10-16_040000.zip"));
        assert!(!dir.exists());
        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "2026-10-16_040000/cache/usa_festnetz.yaml",
                "2026-10-16_040000/current.xml"
            ]
        );
        let mut content = String::new();
        zip.by_name("2026-10-16_040000/current.xml")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "<a/>");
    }

    #[test]
    fn test_archive_never_overwrites() {
        let root = TempDir::new().unwrap();
        let archive_dir = root.path().join("archive");
        fs::create_dir_all(&archive_dir).unwrap();
        fs::write(archive_dir.join("lcr-2026-10-16_040000.zip"), "older").unwrap();

        let bundle = RunBundle::create(&root.path().join("cache"), run_id()).unwrap();
        let dir = bundle.dir().to_path_buf();
        assert!(bundle.archive_into(&archive_dir).is_err());
        assert!(dir.exists());
        assert_eq!(
            fs::read_to_string(archive_dir.join("lcr-2026-10-16_040000.zip")).unwrap(),
            "older"
        );
    }
}
