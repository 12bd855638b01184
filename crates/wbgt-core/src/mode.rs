//! Boot-time communication mode selection
//!
//! ```text
//! Init ──button held──▶ Provisioning
//!   │
//!   └──▶ LoadingSettings ──wifi on──▶ Connecting{n} ──associated──▶ Connected
//!              │                          │
//!              └──────────────────────────┴──▶ Offline(reason)
//! ```
//!
//! `Provisioning` lasts until reset. `Offline` is the degraded terminal state:
//! the device keeps serving local telemetry but has no upstream transport.

use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use log::{error, info, warn};
use rand_core::RngCore;

use crate::context::DeviceContext;
use crate::link::{NetworkError, NetworkLink, StationConfig};
use crate::settings::DeviceSettings;
use crate::storage::{SettingsStore, StorageError, StorageMedium};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommState {
    Init,
    Provisioning,
    LoadingSettings,
    Connecting { attempt: u32 },
    Connected,
    Offline(OfflineReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineReason {
    /// Settings could not be loaded
    Unconfigured(StorageError),
    WifiDisabled,
    JoinFailed(NetworkError),
    AccessPointFailed(NetworkError),
}

/// Where boot ended up, with the settings that were loaded on the way.
#[derive(Debug)]
pub struct BootOutcome {
    pub state: CommState,
    pub settings: Option<DeviceSettings>,
}

pub struct ModeSelector<'a> {
    context: &'a DeviceContext,
    state: CommState,
}

impl<'a> ModeSelector<'a> {
    pub fn new(context: &'a DeviceContext) -> Self {
        Self {
            context,
            state: CommState::Init,
        }
    }

    pub fn state(&self) -> &CommState {
        &self.state
    }

    fn transition(&mut self, next: CommState) {
        info!("Comm mode: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn outcome(&self, settings: Option<DeviceSettings>) -> BootOutcome {
        BootOutcome {
            state: self.state.clone(),
            settings,
        }
    }

    /// Run the boot decision to a resting state.
    ///
    /// Never fails: every error lands in [`CommState::Offline`].
    pub async fn run<B, M, R, L, D>(
        mut self,
        button: &mut B,
        store: &SettingsStore<M, R>,
        link: &mut L,
        delay: &mut D,
    ) -> BootOutcome
    where
        B: InputPin,
        M: StorageMedium,
        R: RngCore,
        L: NetworkLink,
        D: DelayNs,
    {
        // Pull-up input: pressed reads low.
        let held = button.is_low().unwrap_or_else(|e| {
            warn!("Provisioning button unreadable ({:?}), assuming released", e);
            false
        });

        if held {
            self.transition(CommState::Provisioning);
            let ap = self.context.access_point();
            info!("Starting access point {}", ap.ssid);
            if let Err(e) = link.start_access_point(&ap).await {
                error!("Access point failed to start: {}", e);
                self.transition(CommState::Offline(OfflineReason::AccessPointFailed(e)));
            }
            return self.outcome(None);
        }

        self.transition(CommState::LoadingSettings);
        let settings = match store.load().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("No usable settings ({}), staying offline", e);
                self.transition(CommState::Offline(OfflineReason::Unconfigured(e)));
                return self.outcome(None);
            }
        };

        if !settings.wifi_enabled {
            if settings.lora_enabled {
                warn!("LoRa transport is configured but not supported");
            }
            info!("Wi-Fi disabled");
            self.transition(CommState::Offline(OfflineReason::WifiDisabled));
            return self.outcome(Some(settings));
        }

        let station = match StationConfig::from_settings(&settings) {
            Ok(station) => station,
            Err(e) => {
                error!("Cannot join: {}", e);
                self.transition(CommState::Offline(OfflineReason::JoinFailed(e)));
                return self.outcome(Some(settings));
            }
        };

        self.join(&station, link, delay).await;
        self.outcome(Some(settings))
    }

    async fn join<L, D>(&mut self, station: &StationConfig, link: &mut L, delay: &mut D)
    where
        L: NetworkLink,
        D: DelayNs,
    {
        let policy = self.context.join_policy();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if policy.max_attempts.is_some_and(|max| attempt > max) {
                warn!("Gave up joining {} after {} attempts", station.ssid, attempt - 1);
                self.transition(CommState::Offline(OfflineReason::JoinFailed(
                    NetworkError::JoinTimeout,
                )));
                return;
            }

            self.transition(CommState::Connecting { attempt });
            info!("Trying to connect to {}", station.ssid);

            if let Err(e) = link.begin_join(station).await {
                warn!("Join attempt {} rejected: {}", attempt, e);
                delay.delay_ms(policy.attempt_timeout_ms).await;
                continue;
            }

            for _ in 0..policy.polls_per_attempt() {
                if link.is_associated() {
                    info!("Connected to {}", station.ssid);
                    self.transition(CommState::Connected);
                    return;
                }
                delay.delay_ms(policy.poll_interval_ms).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CipherCodec;
    use crate::config::{DeviceConfig, JoinPolicy};
    use crate::identity::DeviceIdentity;
    use crate::link::AccessPointConfig;
    use crate::storage::{MemoryMedium, StorageFiles};
    use embassy_futures::block_on;
    use embedded_hal::digital::{ErrorKind, ErrorType};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    struct Button(Result<bool, ErrorKind>);

    impl ErrorType for Button {
        type Error = ErrorKind;
    }

    impl InputPin for Button {
        fn is_high(&mut self) -> Result<bool, ErrorKind> {
            self.0.map(|low| !low)
        }

        fn is_low(&mut self) -> Result<bool, ErrorKind> {
            self.0
        }
    }

    fn pressed() -> Button {
        Button(Ok(true))
    }

    fn released() -> Button {
        Button(Ok(false))
    }

    #[derive(Default)]
    struct FakeLink {
        ap_started: Option<AccessPointConfig>,
        joins: u32,
        polls: u32,
        /// Association reported on this poll; `None` never associates
        associate_after: Option<u32>,
        reject_joins: bool,
    }

    impl NetworkLink for FakeLink {
        async fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), NetworkError> {
            self.ap_started = Some(config.clone());
            Ok(())
        }

        async fn begin_join(&mut self, _config: &StationConfig) -> Result<(), NetworkError> {
            self.joins += 1;
            if self.reject_joins {
                return Err(NetworkError::LinkFailure("radio busy"));
            }
            Ok(())
        }

        fn is_associated(&mut self) -> bool {
            self.polls += 1;
            self.associate_after.is_some_and(|n| self.polls >= n)
        }
    }

    #[derive(Default)]
    struct CountingDelay {
        total_ms: u64,
    }

    impl DelayNs for CountingDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.total_ms += u64::from(ns / 1_000_000);
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.total_ms += u64::from(ms);
        }
    }

    fn context(join: JoinPolicy) -> DeviceContext {
        let config = DeviceConfig {
            join,
            ..DeviceConfig::default()
        };
        DeviceContext::initialize(
            DeviceIdentity::unknown(),
            config,
            &mut StdRng::seed_from_u64(5),
        )
        .unwrap()
    }

    fn store(
        context: &DeviceContext,
        settings: Option<&DeviceSettings>,
    ) -> SettingsStore<MemoryMedium, StdRng> {
        let store = SettingsStore::new(
            context.codec(),
            StorageFiles::default(),
            MemoryMedium::new(),
            StdRng::seed_from_u64(6),
        );
        if let Some(settings) = settings {
            block_on(store.save(settings)).unwrap();
        }
        store
    }

    fn wifi_settings() -> DeviceSettings {
        DeviceSettings {
            wifi_enabled: true,
            wifi_ssid: alloc::string::String::from("WLAN_XXX"),
            wifi_password: alloc::string::String::from("123456*"),
            ..DeviceSettings::default()
        }
    }

    #[test]
    fn test_button_held_starts_access_point_without_join() {
        let context = context(JoinPolicy::default());
        let store = store(&context, Some(&wifi_settings()));
        let mut link = FakeLink::default();

        let outcome = block_on(ModeSelector::new(&context).run(
            &mut pressed(),
            &store,
            &mut link,
            &mut CountingDelay::default(),
        ));

        assert_eq!(outcome.state, CommState::Provisioning);
        assert!(outcome.settings.is_none());
        assert_eq!(link.joins, 0);
        assert_eq!(
            link.ap_started.unwrap().ssid,
            "VF sensors 000000000000"
        );
    }

    #[test]
    fn test_wifi_disabled_stays_offline() {
        let context = context(JoinPolicy::default());
        let store = store(&context, Some(&DeviceSettings::default()));
        let mut link = FakeLink::default();

        let outcome = block_on(ModeSelector::new(&context).run(
            &mut released(),
            &store,
            &mut link,
            &mut CountingDelay::default(),
        ));

        assert_eq!(outcome.state, CommState::Offline(OfflineReason::WifiDisabled));
        assert_eq!(outcome.settings, Some(DeviceSettings::default()));
        assert_eq!(link.joins, 0);
        assert!(link.ap_started.is_none());
    }

    #[test]
    fn test_connects_after_polling() {
        let context = context(JoinPolicy::default());
        let store = store(&context, Some(&wifi_settings()));
        let mut link = FakeLink {
            associate_after: Some(4),
            ..FakeLink::default()
        };
        let mut delay = CountingDelay::default();

        let outcome = block_on(ModeSelector::new(&context).run(
            &mut released(),
            &store,
            &mut link,
            &mut delay,
        ));

        assert_eq!(outcome.state, CommState::Connected);
        assert_eq!(link.joins, 1);
        assert_eq!(delay.total_ms, 300);
    }

    #[test]
    fn test_join_gives_up_after_max_attempts() {
        let policy = JoinPolicy {
            attempt_timeout_ms: 1_000,
            poll_interval_ms: 250,
            max_attempts: Some(3),
        };
        let context = context(policy);
        let store = store(&context, Some(&wifi_settings()));
        let mut link = FakeLink::default();
        let mut delay = CountingDelay::default();

        let outcome = block_on(ModeSelector::new(&context).run(
            &mut released(),
            &store,
            &mut link,
            &mut delay,
        ));

        assert_eq!(
            outcome.state,
            CommState::Offline(OfflineReason::JoinFailed(NetworkError::JoinTimeout))
        );
        assert_eq!(link.joins, 3);
        assert_eq!(link.polls, 12);
        // Cooperative waits only; bounded by attempts * window.
        assert_eq!(delay.total_ms, 3_000);
    }

    #[test]
    fn test_rejected_joins_wait_out_the_window() {
        let policy = JoinPolicy {
            attempt_timeout_ms: 500,
            poll_interval_ms: 100,
            max_attempts: Some(2),
        };
        let context = context(policy);
        let store = store(&context, Some(&wifi_settings()));
        let mut link = FakeLink {
            reject_joins: true,
            ..FakeLink::default()
        };
        let mut delay = CountingDelay::default();

        let outcome = block_on(ModeSelector::new(&context).run(
            &mut released(),
            &store,
            &mut link,
            &mut delay,
        ));

        assert!(matches!(outcome.state, CommState::Offline(OfflineReason::JoinFailed(_))));
        assert_eq!(link.polls, 0);
        assert_eq!(delay.total_ms, 1_000);
    }

    #[test]
    fn test_missing_settings_file() {
        let context = context(JoinPolicy::default());
        let store = store(&context, None);
        let mut link = FakeLink::default();

        let outcome = block_on(ModeSelector::new(&context).run(
            &mut released(),
            &store,
            &mut link,
            &mut CountingDelay::default(),
        ));

        assert_eq!(
            outcome.state,
            CommState::Offline(OfflineReason::Unconfigured(StorageError::NotFound))
        );
        assert_eq!(link.joins, 0);
    }

    #[test]
    fn test_corrupt_settings_file() {
        let context = context(JoinPolicy::default());
        let mut medium = MemoryMedium::new();
        medium.insert("globalsettings", b"short");
        let store = SettingsStore::new(
            CipherCodec::new(b"ujso3kgnxtuth2bs").unwrap(),
            StorageFiles::default(),
            medium,
            StdRng::seed_from_u64(7),
        );
        let mut link = FakeLink::default();

        let outcome = block_on(ModeSelector::new(&context).run(
            &mut released(),
            &store,
            &mut link,
            &mut CountingDelay::default(),
        ));

        assert!(matches!(
            outcome.state,
            CommState::Offline(OfflineReason::Unconfigured(StorageError::Corrupt(_)))
        ));
        assert_eq!(link.joins, 0);
    }

    #[test]
    fn test_unreadable_button_counts_as_released() {
        let context = context(JoinPolicy::default());
        let store = store(&context, Some(&DeviceSettings::default()));
        let mut link = FakeLink::default();

        let outcome = block_on(ModeSelector::new(&context).run(
            &mut Button(Err(ErrorKind::Other)),
            &store,
            &mut link,
            &mut CountingDelay::default(),
        ));

        assert_eq!(outcome.state, CommState::Offline(OfflineReason::WifiDisabled));
        assert!(link.ap_started.is_none());
    }
}
