//! Per-boot device context
//!
//! Everything that is created once at power-up and lives until reset: the
//! identity, the build configuration, the settings codec and the session IV.

use log::info;
use rand_core::RngCore;

use crate::codec::{CipherCodec, CryptoError, IV_LEN, mint_iv};
use crate::config::{DeviceConfig, JoinPolicy};
use crate::identity::DeviceIdentity;
use crate::link::AccessPointConfig;
use crate::storage::StorageFiles;

#[derive(Debug)]
pub struct DeviceContext {
    identity: DeviceIdentity,
    config: DeviceConfig,
    codec: CipherCodec,
    session_iv: [u8; IV_LEN],
}

impl DeviceContext {
    /// Build the context. Fails only when the cipher key is malformed or the
    /// entropy source cannot produce the session IV; both are fatal.
    pub fn initialize<R: RngCore>(
        identity: DeviceIdentity,
        config: DeviceConfig,
        entropy: &mut R,
    ) -> Result<Self, CryptoError> {
        let codec = CipherCodec::new(config.cipher_key.expose().as_bytes())?;
        let session_iv = mint_iv(entropy)?;

        info!("Device context initialized for {}", identity);
        Ok(Self {
            identity,
            config,
            codec,
            session_iv,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn codec(&self) -> CipherCodec {
        self.codec.clone()
    }

    /// Session IV. Never used for persistence; each save mints its own.
    pub fn session_iv(&self) -> &[u8; IV_LEN] {
        &self.session_iv
    }

    /// Seed for the network stack's sequence numbers and ports.
    pub fn network_seed(&self) -> u64 {
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&self.session_iv[..8]);
        u64::from_le_bytes(seed)
    }

    pub fn access_point(&self) -> AccessPointConfig {
        AccessPointConfig::new(&self.config.access_point, &self.identity)
    }

    pub fn join_policy(&self) -> JoinPolicy {
        self.config.join
    }

    pub fn storage_files(&self) -> StorageFiles {
        self.config.files.clone()
    }
}
