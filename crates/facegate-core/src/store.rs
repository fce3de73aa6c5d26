//! Durable storage for the single enrolled template.
//!
//! The template lives in one binary file. Writes go to a temporary file in
//! the same directory which is fsynced and renamed over the target, so the
//! previous template survives any failed write. The in-memory copy is only
//! replaced after the file is in place.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::DateTime;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Embedding, Template};

const TEMPLATE_MAGIC: &[u8; 4] = b"FGTP";
const FORMAT_VERSION: u16 = 1;
const KIND_F32: u8 = 1;
/// Fixed header: magic, version, kind, reserved, dim, uuid, timestamp, model-version length.
const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 4 + 16 + 8 + 2;
const DIGEST_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read template from {location}: {source}")]
    Read {
        location: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write template to {location}: {source}")]
    Write {
        location: String,
        #[source]
        source: io::Error,
    },
    #[error("template at {location} is corrupt: {reason}")]
    Corrupt { location: String, reason: String },
    #[error("cannot encode template: {0}")]
    Encode(String),
}

/// Raw byte storage underneath a [`TemplateStore`].
pub trait TemplateBackend: Send + Sync {
    /// Read the stored bytes, `None` if nothing was ever written.
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError>;
    /// Replace the stored bytes. Must not leave partial data behind on failure.
    fn write(&self, bytes: &[u8]) -> Result<(), StoreError>;
    /// Human-readable location for logs and errors.
    fn describe(&self) -> String;
}

/// Template file on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, source: io::Error) -> StoreError {
        StoreError::Write {
            location: self.describe(),
            source,
        }
    }
}

impl TemplateBackend for FileBackend {
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                location: self.describe(),
                source,
            }),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| self.write_error(e))?;
        {
            let file = tmp.as_file_mut();
            let mut writer = BufWriter::new(&mut *file);
            writer.write_all(bytes).map_err(|e| self.write_error(e))?;
            writer.flush().map_err(|e| self.write_error(e))?;
        }
        tmp.as_file().sync_all().map_err(|e| self.write_error(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| self.write_error(e))?;
        }

        tmp.persist(&self.path)
            .map_err(|err| self.write_error(err.error))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Holds the enrolled template on disk and in memory.
///
/// Readers take a cheap `Arc` snapshot; writers are serialized and publish
/// the new template only after it is durable.
pub struct TemplateStore {
    backend: Box<dyn TemplateBackend>,
    current: RwLock<Option<Arc<Template>>>,
    write_lock: Mutex<()>,
}

impl TemplateStore {
    /// Store backed by a template file. Nothing is read until [`load`](Self::load).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_backend(Box::new(FileBackend::new(path)))
    }

    pub fn with_backend(backend: Box<dyn TemplateBackend>) -> Self {
        Self {
            backend,
            current: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    pub fn location(&self) -> String {
        self.backend.describe()
    }

    /// Read the persisted template and make it current.
    ///
    /// `Ok(None)` means nothing was ever saved. On error the cache is left alone.
    pub fn load(&self) -> Result<Option<Arc<Template>>, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let location = self.backend.describe();

        let loaded = match self.backend.read()? {
            Some(bytes) => Some(Arc::new(decode_template(&bytes, &location)?)),
            None => None,
        };

        match &loaded {
            Some(template) => tracing::info!(
                location = %location,
                id = %template.id,
                dim = template.embedding.dim(),
                "template loaded"
            ),
            None => tracing::info!(location = %location, "no template stored"),
        }

        self.publish(loaded.clone());
        Ok(loaded)
    }

    /// Persist `embedding` as the new template, replacing any previous one.
    pub fn save(&self, embedding: Embedding) -> Result<Arc<Template>, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let template = Template::new(embedding);
        let bytes = encode_template(&template)?;
        self.backend.write(&bytes)?;

        let template = Arc::new(template);
        self.publish(Some(Arc::clone(&template)));
        tracing::info!(
            location = %self.backend.describe(),
            id = %template.id,
            dim = template.embedding.dim(),
            "template saved"
        );
        Ok(template)
    }

    /// Template from the most recent successful `save` or `load`.
    pub fn current(&self) -> Option<Arc<Template>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, template: Option<Arc<Template>>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = template;
    }
}

/// Serialize a template into the binary file format.
pub fn encode_template(template: &Template) -> Result<Vec<u8>, StoreError> {
    let embedding = &template.embedding;
    if embedding.values.is_empty() {
        return Err(StoreError::Encode("embedding is empty".into()));
    }
    let dim = u32::try_from(embedding.values.len())
        .map_err(|_| StoreError::Encode(format!("embedding too long: {}", embedding.dim())))?;
    let model_version = embedding.model_version.as_deref().unwrap_or("");
    let model_version_len = u16::try_from(model_version.len()).map_err(|_| {
        StoreError::Encode(format!("model version too long: {} bytes", model_version.len()))
    })?;

    let mut out = Vec::with_capacity(
        HEADER_LEN + model_version.len() + embedding.values.len() * 4 + DIGEST_LEN,
    );
    out.extend_from_slice(TEMPLATE_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(KIND_F32);
    out.push(0);
    out.extend_from_slice(&dim.to_le_bytes());
    out.extend_from_slice(template.id.as_bytes());
    out.extend_from_slice(&template.enrolled_at.timestamp_millis().to_le_bytes());
    out.extend_from_slice(&model_version_len.to_le_bytes());
    out.extend_from_slice(model_version.as_bytes());
    for value in &embedding.values {
        out.extend_from_slice(&value.to_le_bytes());
    }

    let digest = Sha256::digest(&out);
    out.extend_from_slice(&digest);
    Ok(out)
}

/// Parse the binary file format, verifying its checksum.
pub fn decode_template(bytes: &[u8], location: &str) -> Result<Template, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        location: location.to_string(),
        reason,
    };

    if bytes.len() < HEADER_LEN + DIGEST_LEN {
        return Err(corrupt(format!("file too short ({} bytes)", bytes.len())));
    }
    if &bytes[0..4] != TEMPLATE_MAGIC {
        return Err(corrupt("bad magic".into()));
    }

    let (body, stored_digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
    if Sha256::digest(body).as_slice() != stored_digest {
        return Err(corrupt("checksum mismatch".into()));
    }

    let version = u16::from_le_bytes([body[4], body[5]]);
    if version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }
    if body[6] != KIND_F32 {
        return Err(corrupt(format!("unsupported element kind {}", body[6])));
    }

    let dim = u32::from_le_bytes([body[8], body[9], body[10], body[11]]) as usize;
    let mut id = [0u8; 16];
    id.copy_from_slice(&body[12..28]);
    let mut millis = [0u8; 8];
    millis.copy_from_slice(&body[28..36]);
    let millis = i64::from_le_bytes(millis);
    let model_version_len = u16::from_le_bytes([body[36], body[37]]) as usize;

    let expected = HEADER_LEN + model_version_len + dim * 4;
    if body.len() != expected {
        return Err(corrupt(format!(
            "expected {expected} bytes before checksum for dimension {dim}, found {}",
            body.len()
        )));
    }
    if dim == 0 {
        return Err(corrupt("embedding is empty".into()));
    }

    let model_version_bytes = &body[HEADER_LEN..HEADER_LEN + model_version_len];
    let model_version = if model_version_len == 0 {
        None
    } else {
        Some(
            std::str::from_utf8(model_version_bytes)
                .map_err(|e| corrupt(format!("model version is not UTF-8: {e}")))?
                .to_string(),
        )
    };

    let values = body[HEADER_LEN + model_version_len..]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let enrolled_at = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| corrupt(format!("timestamp out of range: {millis}")))?;

    Ok(Template {
        id: Uuid::from_bytes(id),
        embedding: Embedding {
            values,
            model_version,
        },
        enrolled_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn embedding(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    /// Backend that always fails to write and remembers nothing.
    struct FailingBackend;

    impl TemplateBackend for FailingBackend {
        fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        fn write(&self, _bytes: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Write {
                location: self.describe(),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            })
        }

        fn describe(&self) -> String {
            "failing".into()
        }
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = TemplateStore::open(tmp.path().join("template.bin"));
        assert!(store.load().unwrap().is_none());
        assert!(store.current().is_none());
    }

    #[test]
    fn test_save_then_load_in_new_store() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("template.bin");

        let store = TemplateStore::open(&path);
        let mut emb = embedding(&[0.1, -0.25, f32::MIN_POSITIVE, -0.0, 1.0e-7]);
        emb.model_version = Some("w600k_r50".into());
        let saved = store.save(emb.clone()).unwrap();
        assert_eq!(store.current().unwrap().embedding, emb);

        let reopened = TemplateStore::open(&path);
        assert!(reopened.current().is_none());
        let loaded = reopened.load().unwrap().unwrap();
        assert_eq!(*loaded, *saved);
        // Bit-exact precision.
        for (a, b) in loaded.embedding.values.iter().zip(emb.values.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(reopened.current().unwrap().id, saved.id);
    }

    #[test]
    fn test_save_replaces_previous_template() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("template.bin");
        let store = TemplateStore::open(&path);

        let first = store.save(embedding(&[1.0, 0.0])).unwrap();
        let second = store.save(embedding(&[0.0, 1.0, 0.5])).unwrap();
        assert_ne!(first.id, second.id);

        let loaded = TemplateStore::open(&path).load().unwrap().unwrap();
        assert_eq!(loaded.embedding.values, vec![0.0, 1.0, 0.5]);
        assert_eq!(loaded.id, second.id);
    }

    #[test]
    fn test_large_embedding_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("template.bin");
        let values: Vec<f32> = (0..512).map(|i| (i as f32 * 0.37).sin()).collect();
        TemplateStore::open(&path).save(embedding(&values)).unwrap();

        let loaded = TemplateStore::open(&path).load().unwrap().unwrap();
        assert_eq!(loaded.embedding.values, values);
        assert_eq!(loaded.embedding.model_version, None);
    }

    #[test]
    fn test_corrupt_checksum_detected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("template.bin");
        TemplateStore::open(&path).save(embedding(&[0.5, 0.5])).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_LEN] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let err = TemplateStore::open(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }), "got {err:?}");
    }

    #[test]
    fn test_truncated_file_detected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("template.bin");
        fs::write(&path, b"FGTP").unwrap();
        let err = TemplateStore::open(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_foreign_file_detected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("template.bin");
        fs::write(&path, vec![0x80u8; 128]).unwrap();
        let err = TemplateStore::open(&path).load().unwrap_err();
        match err {
            StoreError::Corrupt { reason, .. } => assert_eq!(reason, "bad magic"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_failed_load_keeps_cache() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("template.bin");
        let store = TemplateStore::open(&path);
        store.save(embedding(&[0.2, 0.3])).unwrap();

        fs::write(&path, b"garbage garbage garbage garbage garbage garbage garbage").unwrap();
        assert!(store.load().is_err());
        assert_eq!(store.current().unwrap().embedding.values, vec![0.2, 0.3]);
    }

    #[test]
    fn test_failed_write_keeps_cache() {
        let store = TemplateStore::with_backend(Box::new(FailingBackend));
        let err = store.save(embedding(&[0.1])).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert!(store.current().is_none());
    }

    #[test]
    fn test_write_onto_directory_fails_cleanly() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("template.bin");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"x").unwrap();

        let store = TemplateStore::open(&path);
        let err = store.save(embedding(&[0.1, 0.2])).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert!(store.current().is_none());
        // Only the directory remains, no stray temp files.
        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_empty_embedding_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = TemplateStore::open(tmp.path().join("template.bin"));
        assert!(matches!(
            store.save(embedding(&[])),
            Err(StoreError::Encode(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_template_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("template.bin");
        TemplateStore::open(&path).save(embedding(&[0.4])).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_readers_never_see_a_torn_template() {
        use std::collections::HashMap;
        use std::sync::atomic::{AtomicBool, Ordering};

        let tmp = TempDir::new().unwrap();
        let store = TemplateStore::open(tmp.path().join("template.bin"));
        let saved = Mutex::new(HashMap::new());
        let done = AtomicBool::new(false);

        let observed: Vec<(Uuid, usize)> = std::thread::scope(|scope| {
            let (store, done) = (&store, &done);
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(move || {
                        let mut seen = Vec::new();
                        while !done.load(Ordering::Acquire) {
                            if let Some(template) = store.current() {
                                // Every value of save `n` is `n`, over `n` dimensions.
                                let values = &template.embedding.values;
                                assert_eq!(values.len(), values[0] as usize);
                                assert!(values.iter().all(|&v| v == values[0]));
                                seen.push((template.id, values.len()));
                            }
                        }
                        seen
                    })
                })
                .collect();

            for n in 1..=40usize {
                let template = store.save(embedding(&vec![n as f32; n])).unwrap();
                saved.lock().unwrap().insert(template.id, n);
            }
            done.store(true, Ordering::Release);

            readers
                .into_iter()
                .flat_map(|reader| reader.join().unwrap())
                .collect()
        });

        let saved = saved.into_inner().unwrap();
        assert_eq!(saved.len(), 40);
        for (id, dim) in observed {
            assert_eq!(saved.get(&id), Some(&dim), "template {id} has the wrong dimension");
        }
        assert_eq!(store.current().unwrap().embedding.dim(), 40);
    }
}
