use sha2::{Digest, Sha256};
use shared::ReportSummary;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Report not found: {0}")]
    NotFound(Uuid),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persists rendered reports as `<id>.html` with a `<id>.json` summary.
#[derive(Clone)]
pub struct ReportStore {
    root: PathBuf,
}

impl ReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        log::info!("Report store at {}", root.display());
        Ok(Self { root })
    }

    pub fn calculate_image_hash(image_data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image_data);
        hex::encode(hasher.finalize())
    }

    /// Writes the HTML before the summary, so a summary is only visible once
    /// its report can be downloaded.
    pub fn save(&self, summary: &ReportSummary, html: &str) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(summary)?;
        self.write_atomic(&self.html_path(summary.id), html.as_bytes())?;
        self.write_atomic(&self.summary_path(summary.id), &json)?;
        log::info!("Stored report {}", summary.id);
        Ok(())
    }

    pub fn load_summary(&self, id: Uuid) -> Result<ReportSummary, StoreError> {
        let bytes = self.read(id, &self.summary_path(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn load_html(&self, id: Uuid) -> Result<String, StoreError> {
        let bytes = self.read(id, &self.html_path(id))?;
        String::from_utf8(bytes)
            .map_err(|e| StoreError::Io(std::io::Error::new(ErrorKind::InvalidData, e)))
    }

    fn read(&self, id: Uuid, path: &Path) -> Result<Vec<u8>, StoreError> {
        fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(id),
            _ => StoreError::Io(e),
        })
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        let result = (|| {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.map_err(StoreError::Io)
    }

    fn html_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{}.html", id))
    }

    fn summary_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }
}
