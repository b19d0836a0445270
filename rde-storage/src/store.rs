//! Per-device dictionary store.
//!
//! Dictionaries are accumulated chunk by chunk as they arrive from the device,
//! persisted under `<root>/<device uuid>/` once complete, and reloaded from
//! there when the device is seen again.

use crate::dictionary::{Dictionary, DictionaryKey};
use crate::error::StorageError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Dictionary store scoped to one device UUID.
#[derive(Debug)]
pub struct DictionaryStore {
    uuid: Uuid,
    dir: PathBuf,
    dictionaries: HashMap<DictionaryKey, Dictionary>,
}

impl DictionaryStore {
    /// Creates a store rooted at `root`. Nothing touches the disk until a
    /// dictionary is saved or [`DictionaryStore::load_persisted`] runs.
    pub fn new(root: impl AsRef<Path>, uuid: Uuid) -> Self {
        Self {
            uuid,
            dir: root.as_ref().join(uuid.to_string()),
            dictionaries: HashMap::new(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Directory holding this device's dictionary files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: DictionaryKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Appends one received chunk to the dictionary for `(resource_id, schema_class)`.
    ///
    /// With `has_checksum`, the last byte of `payload` is a trailer and is not
    /// stored. With `is_final`, the dictionary is marked complete and saved; a
    /// save failure is returned but the completed dictionary stays usable in
    /// memory.
    pub fn add_chunk(
        &mut self,
        resource_id: u32,
        schema_class: u8,
        payload: &[u8],
        has_checksum: bool,
        is_final: bool,
    ) -> Result<(), StorageError> {
        if payload.is_empty() {
            return Err(StorageError::InvalidArgument(format!(
                "empty chunk for dictionary ({}, {})",
                resource_id, schema_class
            )));
        }

        let key = DictionaryKey::new(resource_id, schema_class);
        let path = self.path_for(key);
        let dictionary = self
            .dictionaries
            .entry(key)
            .or_insert_with(|| Dictionary::new(key, path));

        let content = if has_checksum {
            &payload[..payload.len() - 1]
        } else {
            payload
        };
        dictionary.append(content)?;

        if is_final {
            dictionary.mark_complete();
            tracing::info!(
                "Dictionary {} complete for device {} ({} bytes)",
                key,
                self.uuid,
                dictionary.len()
            );
            dictionary.save()?;
        }
        Ok(())
    }

    /// Completes and saves a dictionary whose last chunk carried no data.
    ///
    /// Fails if nothing was received for the key or it is already complete.
    pub fn complete(&mut self, resource_id: u32, schema_class: u8) -> Result<(), StorageError> {
        let key = DictionaryKey::new(resource_id, schema_class);
        let dictionary = match self.dictionaries.get_mut(&key) {
            Some(dictionary) if !dictionary.is_empty() && !dictionary.is_complete() => dictionary,
            _ => {
                return Err(StorageError::InvalidArgument(format!(
                    "no partial data to complete for dictionary {}",
                    key
                )))
            }
        };
        dictionary.mark_complete();
        tracing::info!(
            "Dictionary {} complete for device {} ({} bytes)",
            key,
            self.uuid,
            dictionary.len()
        );
        dictionary.save()
    }

    /// Returns the dictionary for the key, complete or not.
    pub fn get(&self, resource_id: u32, schema_class: u8) -> Option<&Dictionary> {
        self.dictionaries
            .get(&DictionaryKey::new(resource_id, schema_class))
    }

    /// Returns the dictionary only if it is complete and usable by a codec.
    pub fn get_complete(&self, resource_id: u32, schema_class: u8) -> Option<&Dictionary> {
        self.get(resource_id, schema_class)
            .filter(|dictionary| dictionary.is_complete())
    }

    /// Returns the device-wide annotation dictionary if it is loaded.
    pub fn annotation(&self) -> Option<&Dictionary> {
        self.dictionaries
            .get(&DictionaryKey::ANNOTATION)
            .filter(|dictionary| dictionary.is_complete())
    }

    pub fn contains_complete(&self, resource_id: u32, schema_class: u8) -> bool {
        self.get_complete(resource_id, schema_class).is_some()
    }

    /// Builds a complete dictionary from a raw blob on local storage.
    pub fn create_from_file(
        &mut self,
        key: DictionaryKey,
        source: impl AsRef<Path>,
    ) -> Result<&Dictionary, StorageError> {
        let source = source.as_ref();
        let data = fs::read(source)?;
        if data.is_empty() {
            return Err(StorageError::InvalidArgument(format!(
                "dictionary file {} is empty",
                source.display()
            )));
        }

        tracing::info!(
            "Loaded dictionary {} from {} ({} bytes)",
            key,
            source.display(),
            data.len()
        );
        let dictionary = Dictionary::from_content(key, self.path_for(key), data);
        self.dictionaries.insert(key, dictionary);
        self.dictionaries
            .get(&key)
            .ok_or(StorageError::DictionaryNotFound {
                resource_id: key.resource_id,
                schema_class: key.schema_class,
            })
    }

    /// Loads the annotation dictionary from a local blob.
    pub fn load_annotation(&mut self, source: impl AsRef<Path>) -> Result<(), StorageError> {
        self.create_from_file(DictionaryKey::ANNOTATION, source)
            .map(|_| ())
    }

    /// Reloads every complete dictionary persisted for this device.
    ///
    /// Unreadable or corrupt files are logged and skipped. Returns the number
    /// of dictionaries loaded.
    pub fn load_persisted(&mut self) -> Result<usize, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut loaded = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("bin") {
                continue;
            }

            match Dictionary::load(&path) {
                Ok(dictionary) if dictionary.is_complete() => {
                    self.dictionaries.insert(dictionary.key(), dictionary);
                    loaded += 1;
                }
                Ok(dictionary) => {
                    tracing::warn!(
                        "Ignoring incomplete dictionary {} at {}",
                        dictionary.key(),
                        path.display()
                    );
                }
                Err(e) => {
                    tracing::warn!("Skipping dictionary file {}: {}", path.display(), e);
                }
            }
        }

        tracing::info!(
            "Loaded {} persisted dictionaries for device {}",
            loaded,
            self.uuid
        );
        Ok(loaded)
    }

    /// Discards the dictionary and its persisted file.
    pub fn reset(&mut self, resource_id: u32, schema_class: u8) -> Result<(), StorageError> {
        let key = DictionaryKey::new(resource_id, schema_class);
        match self.dictionaries.remove(&key) {
            Some(dictionary) => dictionary.remove_file(),
            None => Dictionary::new(key, self.path_for(key)).remove_file(),
        }
    }

    pub fn keys(&self) -> Vec<DictionaryKey> {
        let mut keys: Vec<_> = self.dictionaries.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.dictionaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionaries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> DictionaryStore {
        DictionaryStore::new(dir.path(), Uuid::from_u128(0x1234))
    }

    #[test]
    fn test_chunks_accumulate_and_strip_final_checksum() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        store.add_chunk(5, 0, b"abc", false, false).unwrap();
        assert!(store.get(5, 0).is_some());
        assert!(store.get_complete(5, 0).is_none());

        store.add_chunk(5, 0, b"def", false, false).unwrap();
        store.add_chunk(5, 0, b"ghX", true, true).unwrap();

        let dictionary = store.get_complete(5, 0).unwrap();
        assert_eq!(dictionary.data(), b"abcdefgh");
        assert!(dictionary.path().exists());
    }

    #[test]
    fn test_empty_chunk_rejected_without_state_change() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let err = store.add_chunk(1, 0, &[], false, false).unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
        assert!(store.get(1, 0).is_none());

        store.add_chunk(1, 0, b"xy", false, false).unwrap();
        let err = store.add_chunk(1, 0, &[], true, true).unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
        let dictionary = store.get(1, 0).unwrap();
        assert_eq!(dictionary.data(), b"xy");
        assert!(!dictionary.is_complete());
    }

    #[test]
    fn test_complete_without_final_data() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        assert!(matches!(
            store.complete(3, 0),
            Err(StorageError::InvalidArgument(_))
        ));

        store.add_chunk(3, 0, b"whole", false, false).unwrap();
        store.complete(3, 0).unwrap();
        let dictionary = store.get_complete(3, 0).unwrap();
        assert_eq!(dictionary.data(), b"whole");
        assert!(dictionary.path().exists());

        assert!(store.complete(3, 0).is_err());
    }

    #[test]
    fn test_chunk_after_completion_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        store.add_chunk(2, 0, b"done", false, true).unwrap();
        assert!(matches!(
            store.add_chunk(2, 0, b"more", false, false),
            Err(StorageError::DictionaryComplete { .. })
        ));
        assert_eq!(store.get(2, 0).unwrap().data(), b"done");
    }

    #[test]
    fn test_persisted_dictionaries_reload_by_uuid() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = store(&dir);
            store.add_chunk(1, 0, b"one", false, true).unwrap();
            store.add_chunk(2, 0, b"two", false, true).unwrap();
            store.add_chunk(3, 0, b"partial", false, false).unwrap();
        }

        let mut reloaded = store(&dir);
        assert_eq!(reloaded.load_persisted().unwrap(), 2);
        assert_eq!(reloaded.get_complete(1, 0).unwrap().data(), b"one");
        assert_eq!(reloaded.get_complete(2, 0).unwrap().data(), b"two");
        assert!(reloaded.get(3, 0).is_none());

        let mut other = DictionaryStore::new(dir.path(), Uuid::from_u128(0x9999));
        assert_eq!(other.load_persisted().unwrap(), 0);
    }

    #[test]
    fn test_load_persisted_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.add_chunk(1, 0, b"good", false, true).unwrap();
        fs::write(store.dir().join("dictionary_9_0.bin"), b"garbage").unwrap();

        let mut reloaded = DictionaryStore::new(dir.path(), store.uuid());
        assert_eq!(reloaded.load_persisted().unwrap(), 1);
    }

    #[test]
    fn test_reset_removes_memory_and_file() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.add_chunk(4, 1, b"data", false, true).unwrap();
        let path = store.get(4, 1).unwrap().path().to_path_buf();
        assert!(path.exists());

        store.reset(4, 1).unwrap();
        assert!(store.get(4, 1).is_none());
        assert!(!path.exists());

        // Resetting an unknown dictionary is harmless.
        store.reset(99, 0).unwrap();
    }

    #[test]
    fn test_annotation_from_file() {
        let dir = TempDir::new().unwrap();
        let blob = dir.path().join("annotation_source.bin");
        fs::write(&blob, [0xA0, 0xA1, 0xA2]).unwrap();

        let mut store = store(&dir);
        assert!(store.annotation().is_none());
        store.load_annotation(&blob).unwrap();
        assert_eq!(store.annotation().unwrap().data(), &[0xA0, 0xA1, 0xA2]);

        assert!(store.load_annotation(dir.path().join("missing.bin")).is_err());
    }

    proptest! {
        #[test]
        fn test_concatenation_minus_trailer(
            chunks in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 1..32),
                1..6,
            )
        ) {
            let dir = TempDir::new().unwrap();
            let mut store = store(&dir);
            let last = chunks.len() - 1;
            for (i, chunk) in chunks.iter().enumerate() {
                store.add_chunk(8, 0, chunk, i == last, i == last).unwrap();
            }

            let mut expected: Vec<u8> = chunks.concat();
            expected.pop();
            let dictionary = store.get_complete(8, 0).unwrap();
            prop_assert_eq!(dictionary.data(), expected.as_slice());
        }
    }
}
