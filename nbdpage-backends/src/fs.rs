//! Filesystem page store: one file per page.

use std::io;
use std::path::{Path, PathBuf};

use nbdpage_store::{PageAddress, SendPageStore};

/// Page store laying out `<root>/<export>/page-<index:08>.bin`.
///
/// Pages are written to a temporary file and renamed into place, so a
/// concurrent reader sees either the old page or the new page, never a
/// partial write. Missing files read as zero pages; short files are
/// zero-padded to the requested page size.
#[derive(Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`. The directory itself is created
    /// lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory pages are stored under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn export_dir(&self, export: &str) -> PathBuf {
        self.root.join(export)
    }

    fn page_path(&self, addr: &PageAddress) -> PathBuf {
        self.export_dir(&addr.export).join(addr.object_name())
    }

    // Export names become directory names; a separator would escape the root.
    fn check_export(export: &str) -> io::Result<()> {
        if export.is_empty()
            || export.contains(['/', '\\'])
            || export == "."
            || export == ".."
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("export name {:?} is not a valid directory name", export),
            ));
        }
        Ok(())
    }
}

impl SendPageStore for FsStore {
    type Error = io::Error;

    async fn read_page(&self, addr: &PageAddress) -> Result<Vec<u8>, Self::Error> {
        Self::check_export(&addr.export)?;
        let path = self.page_path(addr);
        let mut page = vec![0u8; addr.size as usize];
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let n = bytes.len().min(page.len());
                page[..n].copy_from_slice(&bytes[..n]);
                Ok(page)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(page),
            Err(e) => Err(e),
        }
    }

    async fn write_page(&self, addr: &PageAddress, data: &[u8]) -> Result<(), Self::Error> {
        Self::check_export(&addr.export)?;
        tokio::fs::create_dir_all(self.export_dir(&addr.export)).await?;

        let path = self.page_path(addr);
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Err(e) = tokio::fs::write(&tmp, data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        tokio::fs::rename(&tmp, &path).await
    }

    async fn flush_export(&self, export: &str) -> Result<(), Self::Error> {
        // Rename is atomic and tokio::fs::write does not return until the
        // data reaches the kernel; nothing extra to do here.
        Self::check_export(export)
    }
}
