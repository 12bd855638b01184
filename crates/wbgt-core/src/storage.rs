//! Encrypted settings persistence
//!
//! [`SettingsStore`] owns the storage medium and the entropy source behind one
//! async mutex, so saves and loads are serialized against each other and a
//! reader never observes a half-written file.
//!
//! Saves use a shadow copy: the complete frame is written to the shadow file,
//! then to the primary file, then the shadow is removed. If power is lost
//! while the primary is being rewritten, the next load finds the intact
//! shadow and recovers from it.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::convert::Infallible;
use core::fmt;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use log::{debug, error, info, warn};
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::codec::{CipherCodec, CipherFrame, CryptoError, mint_iv};
use crate::settings::DeviceSettings;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("settings file not found")]
    NotFound,
    #[error("settings file is corrupt: {0}")]
    Corrupt(&'static str),
    #[error("storage medium I/O failure")]
    IoFailure,
    #[error("settings codec failure: {0}")]
    Crypto(CryptoError),
}

/// Byte-oriented file storage the settings and web assets live on.
///
/// Names may contain `/` separators for nested assets (`www/index.html`).
pub trait StorageMedium {
    type Error: fmt::Debug;

    /// Read a whole file. `Ok(None)` when it does not exist.
    fn read(&mut self, name: &str) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Replace the contents of a file, creating it if needed.
    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), Self::Error>;

    /// Remove a file. Removing a missing file is not an error.
    fn remove(&mut self, name: &str) -> Result<(), Self::Error>;
}

/// RAM-backed medium, used by tests and as a scratch medium.
#[derive(Debug, Default, Clone)]
pub struct MemoryMedium {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, data: &[u8]) {
        self.files.insert(String::from(name), data.to_vec());
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }
}

impl StorageMedium for MemoryMedium {
    type Error = Infallible;

    fn read(&mut self, name: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.files.get(name).cloned())
    }

    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), Self::Error> {
        self.insert(name, data);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), Self::Error> {
        self.files.remove(name);
        Ok(())
    }
}

/// File names of the primary settings file and its shadow copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageFiles {
    pub settings: String,
    pub shadow: String,
}

impl Default for StorageFiles {
    fn default() -> Self {
        Self {
            settings: String::from("globalsettings"),
            shadow: String::from("globalsettings.new"),
        }
    }
}

struct StoreInner<M, R> {
    medium: M,
    entropy: R,
}

pub struct SettingsStore<M, R> {
    codec: CipherCodec,
    files: StorageFiles,
    inner: Mutex<CriticalSectionRawMutex, StoreInner<M, R>>,
}

impl<M, R> SettingsStore<M, R>
where
    M: StorageMedium,
    R: RngCore,
{
    pub fn new(codec: CipherCodec, files: StorageFiles, medium: M, entropy: R) -> Self {
        Self {
            codec,
            files,
            inner: Mutex::new(StoreInner { medium, entropy }),
        }
    }

    /// Load and decrypt the persisted settings.
    ///
    /// Falls back to the shadow copy when the primary file is missing or
    /// unreadable. The primary file's error is reported if neither works.
    pub async fn load(&self) -> Result<DeviceSettings, StorageError> {
        let mut inner = self.inner.lock().await;

        let primary = self.load_file(&mut inner.medium, &self.files.settings);
        match primary {
            Ok(settings) => Ok(settings),
            Err(StorageError::IoFailure) => Err(StorageError::IoFailure),
            Err(primary_err) => match self.load_file(&mut inner.medium, &self.files.shadow) {
                Ok(settings) => {
                    warn!(
                        "Primary settings unreadable ({}), recovered from shadow copy",
                        primary_err
                    );
                    Ok(settings)
                }
                Err(_) => Err(primary_err),
            },
        }
    }

    /// Encrypt under a freshly minted IV and persist the complete record.
    pub async fn save(&self, settings: &DeviceSettings) -> Result<(), StorageError> {
        let plaintext = settings.to_json().map_err(|e| {
            error!("Failed to encode settings: {}", e);
            StorageError::Corrupt("settings could not be encoded")
        })?;

        let mut inner = self.inner.lock().await;
        let StoreInner { medium, entropy } = &mut *inner;

        let iv = mint_iv(entropy).map_err(StorageError::Crypto)?;
        let frame = self
            .codec
            .seal(iv, &plaintext)
            .map_err(StorageError::Crypto)?
            .to_bytes();

        write_file(medium, &self.files.shadow, &frame)?;
        write_file(medium, &self.files.settings, &frame)?;

        if let Err(e) = medium.remove(&self.files.shadow) {
            // Primary is complete; a stale shadow only shadows identical data.
            warn!("Failed to remove settings shadow copy: {:?}", e);
        }

        info!("Settings saved ({} bytes)", frame.len());
        Ok(())
    }

    /// Read a static asset from the same medium.
    pub async fn fetch_asset(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let mut inner = self.inner.lock().await;
        match inner.medium.read(path) {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(StorageError::NotFound),
            Err(e) => {
                error!("Failed to read asset {}: {:?}", path, e);
                Err(StorageError::IoFailure)
            }
        }
    }

    pub fn files(&self) -> &StorageFiles {
        &self.files
    }

    /// Tear the store apart, returning the medium and entropy source.
    pub fn into_parts(self) -> (M, R) {
        let inner = self.inner.into_inner();
        (inner.medium, inner.entropy)
    }

    fn load_file(&self, medium: &mut M, name: &str) -> Result<DeviceSettings, StorageError> {
        let bytes = match medium.read(name) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(StorageError::NotFound),
            Err(e) => {
                error!("Failed to read {}: {:?}", name, e);
                return Err(StorageError::IoFailure);
            }
        };
        debug!("Read {} ({} bytes)", name, bytes.len());

        let frame = CipherFrame::from_bytes(&bytes)
            .ok_or(StorageError::Corrupt("file shorter than the IV"))?;
        let plaintext = self.codec.open(&frame).map_err(StorageError::Crypto)?;
        if core::str::from_utf8(&plaintext).is_err() {
            return Err(StorageError::Crypto(CryptoError::InvalidUtf8));
        }

        DeviceSettings::from_json(&plaintext).map_err(|e| {
            warn!("Stored settings in {} rejected: {}", name, e);
            StorageError::Corrupt("decrypted payload is not a valid settings record")
        })
    }
}

fn write_file<M: StorageMedium>(medium: &mut M, name: &str, data: &[u8]) -> Result<(), StorageError> {
    medium.write(name, data).map_err(|e| {
        error!("Failed to write {}: {:?}", name, e);
        StorageError::IoFailure
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IV_LEN;
    use core::num::NonZeroU32;
    use embassy_futures::block_on;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const KEY: &[u8; 16] = b"ujso3kgnxtuth2bs";

    fn sample_settings() -> DeviceSettings {
        DeviceSettings {
            user_code: String::from("rv50V9gDybyE5oMr"),
            wifi_enabled: true,
            wifi_ssid: String::from("WLAN_XXX"),
            wifi_password: String::from("123456*"),
            mqtt_uri: String::from("www.example.com"),
            mqtt_topic: String::from("home/inputs/air"),
            ..DeviceSettings::default()
        }
    }

    fn store_with(medium: MemoryMedium) -> SettingsStore<MemoryMedium, StdRng> {
        SettingsStore::new(
            CipherCodec::new(KEY).unwrap(),
            StorageFiles::default(),
            medium,
            StdRng::seed_from_u64(42),
        )
    }

    #[test]
    fn test_save_then_load() {
        let store = store_with(MemoryMedium::new());
        let settings = sample_settings();

        block_on(store.save(&settings)).unwrap();
        assert_eq!(block_on(store.load()).unwrap(), settings);

        let (medium, _) = store.into_parts();
        assert!(medium.get("globalsettings.new").is_none());
        let stored = medium.get("globalsettings").unwrap();
        assert_eq!(stored.len(), IV_LEN + settings.to_json().unwrap().len());
    }

    #[test]
    fn test_repeated_saves_never_repeat_ciphertext() {
        let store = store_with(MemoryMedium::new());
        let settings = sample_settings();

        block_on(store.save(&settings)).unwrap();
        let (medium, rng) = store.into_parts();
        let first = medium.get("globalsettings").unwrap().to_vec();

        let store = SettingsStore::new(
            CipherCodec::new(KEY).unwrap(),
            StorageFiles::default(),
            medium,
            rng,
        );
        block_on(store.save(&settings)).unwrap();
        let (medium, _) = store.into_parts();
        let second = medium.get("globalsettings").unwrap();

        assert_ne!(&first[..IV_LEN], &second[..IV_LEN]);
        assert_ne!(&first[IV_LEN..], &second[IV_LEN..]);
    }

    #[test]
    fn test_missing_file() {
        let store = store_with(MemoryMedium::new());
        assert_eq!(block_on(store.load()).unwrap_err(), StorageError::NotFound);
    }

    #[test]
    fn test_file_shorter_than_iv_is_corrupt() {
        let mut medium = MemoryMedium::new();
        medium.insert("globalsettings", &[0xAA; IV_LEN - 1]);
        let store = store_with(medium);

        assert!(matches!(
            block_on(store.load()).unwrap_err(),
            StorageError::Corrupt(_)
        ));
    }

    #[test]
    fn test_non_settings_plaintext_is_corrupt() {
        let codec = CipherCodec::new(KEY).unwrap();
        let frame = codec.seal([7u8; IV_LEN], b"hello world").unwrap();
        let mut medium = MemoryMedium::new();
        medium.insert("globalsettings", &frame.to_bytes());
        let store = store_with(medium);

        assert!(matches!(
            block_on(store.load()).unwrap_err(),
            StorageError::Corrupt(_)
        ));
    }

    #[test]
    fn test_wrong_key_does_not_load() {
        let other = CipherCodec::new(b"0123456789abcdef").unwrap();
        let json = sample_settings().to_json().unwrap();
        let frame = other.seal([3u8; IV_LEN], &json).unwrap();
        let mut medium = MemoryMedium::new();
        medium.insert("globalsettings", &frame.to_bytes());
        let store = store_with(medium);

        assert!(block_on(store.load()).is_err());
    }

    #[test]
    fn test_torn_primary_recovers_from_shadow() {
        let store = store_with(MemoryMedium::new());
        let settings = sample_settings();
        block_on(store.save(&settings)).unwrap();

        // Power lost while the primary was being rewritten.
        let (mut medium, rng) = store.into_parts();
        let intact = medium.get("globalsettings").unwrap().to_vec();
        medium.insert("globalsettings.new", &intact);
        medium.insert("globalsettings", &intact[..IV_LEN + 4]);

        let store = SettingsStore::new(
            CipherCodec::new(KEY).unwrap(),
            StorageFiles::default(),
            medium,
            rng,
        );
        assert_eq!(block_on(store.load()).unwrap(), settings);
    }

    struct DeadEntropy;

    impl RngCore for DeadEntropy {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand_core::Error> {
            Err(rand_core::Error::from(
                NonZeroU32::new(rand_core::Error::CUSTOM_START).unwrap(),
            ))
        }
    }

    #[test]
    fn test_save_fails_without_entropy() {
        let store = SettingsStore::new(
            CipherCodec::new(KEY).unwrap(),
            StorageFiles::default(),
            MemoryMedium::new(),
            DeadEntropy,
        );

        assert_eq!(
            block_on(store.save(&sample_settings())).unwrap_err(),
            StorageError::Crypto(CryptoError::EntropyUnavailable)
        );
        let (medium, _) = store.into_parts();
        assert!(medium.get("globalsettings").is_none());
    }

    #[test]
    fn test_fetch_asset() {
        let mut medium = MemoryMedium::new();
        medium.insert("www/index.html", b"<html></html>");
        let store = store_with(medium);

        assert_eq!(
            block_on(store.fetch_asset("www/index.html")).unwrap(),
            b"<html></html>"
        );
        assert_eq!(
            block_on(store.fetch_asset("www/missing.js")).unwrap_err(),
            StorageError::NotFound
        );
    }

    /// Medium that truncates first and fills in a second step, yielding in
    /// between, like a FAT driver flushing clusters.
    #[derive(Default)]
    struct TwoStepMedium {
        inner: MemoryMedium,
    }

    impl StorageMedium for TwoStepMedium {
        type Error = Infallible;

        fn read(&mut self, name: &str) -> Result<Option<Vec<u8>>, Self::Error> {
            self.inner.read(name)
        }

        fn write(&mut self, name: &str, data: &[u8]) -> Result<(), Self::Error> {
            self.inner.insert(name, &[]);
            std::thread::yield_now();
            self.inner.insert(name, data);
            Ok(())
        }

        fn remove(&mut self, name: &str) -> Result<(), Self::Error> {
            self.inner.remove(name)
        }
    }

    #[test]
    fn test_concurrent_save_and_load() {
        let store = SettingsStore::new(
            CipherCodec::new(KEY).unwrap(),
            StorageFiles::default(),
            TwoStepMedium::default(),
            StdRng::seed_from_u64(9),
        );
        let settings = sample_settings();
        block_on(store.save(&settings)).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..50 {
                    block_on(store.save(&settings)).unwrap();
                }
            });
            scope.spawn(|| {
                for _ in 0..50 {
                    assert_eq!(block_on(store.load()).unwrap(), settings);
                }
            });
        });
    }
}
