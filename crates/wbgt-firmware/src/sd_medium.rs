//! SD card backed [`StorageMedium`]
//!
//! Blocking FAT access through embedded-sdmmc. Every operation opens the
//! volume, walks to the parent directory, does its work and closes
//! everything again, so no handles stay open between HTTP requests.
//!
//! FAT short names only: each path component is cut down to 8.3 before
//! lookup, so `www/index.html` is read from `WWW/INDEX.HTM`.

use alloc::vec::Vec;
use embedded_sdmmc::{
    Directory, Error, Mode, SdCard, SdCardError, TimeSource, Timestamp, VolumeIdx, VolumeManager,
};
use heapless::String;
use wbgt_core::storage::StorageMedium;

type SdError = Error<SdCardError>;
type SdDirectory<'a, S, D, T> = Directory<'a, SdCard<S, D>, T, 4, 4, 1>;

/// The board has no RTC; files get a fixed timestamp.
pub struct FixedTimeSource;

impl TimeSource for FixedTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 56,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

pub struct SdCardMedium<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
}

impl<S, D, T> SdCardMedium<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    pub fn new(sd_card: SdCard<S, D>, ts: T) -> Self {
        Self {
            volume_mgr: VolumeManager::new(sd_card, ts),
        }
    }
}

/// Cut a path component down to a FAT 8.3 name.
fn short_name(component: &str) -> String<12> {
    let (base, extension) = match component.rsplit_once('.') {
        Some((base, extension)) if !base.is_empty() => (base, Some(extension)),
        _ => (component, None),
    };

    let mut name = String::new();
    for c in base.chars().take(8) {
        let _ = name.push(c);
    }
    if let Some(extension) = extension {
        let _ = name.push('.');
        for c in extension.chars().take(3) {
            let _ = name.push(c);
        }
    }
    name
}

fn split_path(name: &str) -> (&str, &str) {
    name.rsplit_once('/').unwrap_or(("", name))
}

/// Walk `dirs` below `dir`. `Ok(None)` when a component is missing and
/// `create` is off.
fn descend<'a, S, D, T>(
    mut dir: SdDirectory<'a, S, D, T>,
    dirs: &str,
    create: bool,
) -> Result<Option<SdDirectory<'a, S, D, T>>, SdError>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    for component in dirs.split('/').filter(|c| !c.is_empty()) {
        let component = short_name(component);
        let next = match dir.open_dir(component.as_str()) {
            Ok(next) => next,
            Err(Error::NotFound) if create => {
                dir.make_dir_in_dir(component.as_str())?;
                dir.open_dir(component.as_str())?
            }
            Err(Error::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        dir.close()?;
        dir = next;
    }
    Ok(Some(dir))
}

impl<S, D, T> StorageMedium for SdCardMedium<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    type Error = SdError;

    fn read(&mut self, name: &str) -> Result<Option<Vec<u8>>, SdError> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let (dirs, file_name) = split_path(name);
        let Some(dir) = descend(volume0.open_root_dir()?, dirs, false)? else {
            return Ok(None);
        };

        let file = match dir.open_file_in_dir(short_name(file_name).as_str(), Mode::ReadOnly) {
            Ok(file) => file,
            Err(Error::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut data = Vec::with_capacity(file.length() as usize);
        let mut chunk = [0u8; 512];
        while !file.is_eof() {
            let bytes_read = file.read(&mut chunk)?;
            if bytes_read == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..bytes_read]);
        }

        file.close()?;
        dir.close()?;
        volume0.close()?;

        Ok(Some(data))
    }

    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), SdError> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let (dirs, file_name) = split_path(name);
        let dir = descend(volume0.open_root_dir()?, dirs, true)?.ok_or(Error::NotFound)?;

        let file = dir.open_file_in_dir(
            short_name(file_name).as_str(),
            Mode::ReadWriteCreateOrTruncate,
        )?;
        file.write(data)?;
        file.flush()?;

        file.close()?;
        dir.close()?;
        volume0.close()?;

        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), SdError> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let (dirs, file_name) = split_path(name);
        let Some(dir) = descend(volume0.open_root_dir()?, dirs, false)? else {
            return Ok(());
        };

        match dir.delete_file_in_dir(short_name(file_name).as_str()) {
            Ok(()) | Err(Error::NotFound) => {}
            Err(e) => return Err(e),
        }

        dir.close()?;
        volume0.close()?;

        Ok(())
    }
}
