//! Hardware TRNG as a `rand_core` source
//!
//! The ESP32-S3 RNG only produces true random numbers while the radio (or
//! the ADC) is running, so the radio must be initialized first.

use esp_hal::rng::Rng;
use rand_core::{CryptoRng, RngCore};

pub struct HardwareRng {
    rng: Rng,
}

impl HardwareRng {
    pub fn new() -> Self {
        Self { rng: Rng::new() }
    }
}

impl Default for HardwareRng {
    fn default() -> Self {
        Self::new()
    }
}

impl RngCore for HardwareRng {
    fn next_u32(&mut self) -> u32 {
        self.rng.random()
    }

    fn next_u64(&mut self) -> u64 {
        (u64::from(self.rng.random()) << 32) | u64::from(self.rng.random())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let word = self.rng.random().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for HardwareRng {}
