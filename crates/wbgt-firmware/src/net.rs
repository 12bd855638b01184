//! Wi-Fi radio link, network stacks and the HTTP telemetry workers
//!
//! Both the station and the access-point interface get an embassy-net
//! stack at boot. Only one of them ever receives an IPv4 configuration,
//! so the HTTP workers block in `wait_config_up` on the other one.

use alloc::format;
use alloc::string::String;
use embassy_executor::Spawner;
use embassy_net::tcp::TcpSocket;
use embassy_net::{
    Config as NetConfig, ConfigV4, DhcpConfig, Ipv4Cidr, Runner, Stack, StackResources,
    StaticConfigV4,
};
use embassy_time::{Duration, Timer, with_timeout};
use esp_radio::wifi::{
    AccessPointConfig as RadioAccessPointConfig, AuthMethod, ClientConfig, ModeConfig,
    WifiController, WifiDevice,
};
use log::{debug, info, warn};
use static_cell::StaticCell;
use wbgt_core::http::{RequestReader, Response, Status};
use wbgt_core::link::{AccessPointConfig, NetworkError, NetworkLink, StationConfig};
use wbgt_core::settings::StaticIpv4;
use wbgt_core::telemetry::TelemetryService;

use crate::entropy::HardwareRng;
use crate::hardware::{ClimateSensor, GlobeProbe, SdStorage};
use crate::{Sensors, Store};

pub const HTTP_PORT: u16 = 80;
pub const HTTP_WORKER_COUNT: usize = 3;

// HTTP workers plus DHCP and one spare socket.
static STA_RESOURCES: StaticCell<StackResources<5>> = StaticCell::new();
static AP_RESOURCES: StaticCell<StackResources<5>> = StaticCell::new();

type Telemetry = TelemetryService<'static, ClimateSensor, GlobeProbe, SdStorage, HardwareRng>;

/// [`NetworkLink`] over the esp-radio Wi-Fi controller.
pub struct RadioLink {
    controller: WifiController<'static>,
    sta: Stack<'static>,
    ap: Stack<'static>,
    /// Window to wait for `connect_async` before leaving it to polling
    attempt_window: Duration,
}

impl RadioLink {
    /// Build both network stacks and spawn their runners.
    pub fn new(
        spawner: &Spawner,
        controller: WifiController<'static>,
        sta_device: WifiDevice<'static>,
        ap_device: WifiDevice<'static>,
        seed: u64,
        attempt_timeout_ms: u32,
    ) -> Self {
        let (sta, sta_runner) = embassy_net::new(
            sta_device,
            NetConfig::dhcpv4(DhcpConfig::default()),
            STA_RESOURCES.init(StackResources::<5>::new()),
            seed,
        );
        let (ap, ap_runner) = embassy_net::new(
            ap_device,
            NetConfig::default(),
            AP_RESOURCES.init(StackResources::<5>::new()),
            seed.rotate_left(32),
        );

        info!("spawning network stack runners");
        spawner
            .spawn(net_task(sta_runner))
            .expect("station net_task spawn");
        spawner
            .spawn(net_task(ap_runner))
            .expect("access point net_task spawn");

        Self {
            controller,
            sta,
            ap,
            attempt_window: Duration::from_millis(u64::from(attempt_timeout_ms)),
        }
    }

    pub fn station_stack(&self) -> Stack<'static> {
        self.sta
    }

    pub fn access_point_stack(&self) -> Stack<'static> {
        self.ap
    }
}

fn static_config(address: Ipv4Cidr, ip: &StaticIpv4) -> StaticConfigV4 {
    let mut config = StaticConfigV4 {
        address,
        gateway: Some(ip.gateway),
        dns_servers: Default::default(),
    };
    if let Some(dns) = ip.dns {
        let _ = config.dns_servers.push(dns);
    }
    config
}

impl NetworkLink for RadioLink {
    async fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), NetworkError> {
        let mode = ModeConfig::AccessPoint(
            RadioAccessPointConfig::default()
                .with_ssid(config.ssid.clone())
                .with_password(String::from(config.passphrase.expose()))
                .with_auth_method(AuthMethod::Wpa2Personal),
        );

        self.controller.set_config(&mode).map_err(|e| {
            warn!("Wi-Fi set_config error: {:?}", e);
            NetworkError::LinkFailure("access point configuration rejected")
        })?;
        self.controller.start_async().await.map_err(|e| {
            warn!("Wi-Fi start_async error: {:?}", e);
            NetworkError::LinkFailure("access point failed to start")
        })?;

        self.ap.set_config_v4(ConfigV4::Static(StaticConfigV4 {
            address: Ipv4Cidr::new(config.address, config.prefix_len),
            gateway: config.gateway,
            dns_servers: Default::default(),
        }));
        // TODO: run a DHCP server (edge-dhcp) on the AP stack; clients need a
        // static address in 10.0.0.0/24 until then.
        info!(
            "Access point {} up at {}/{}",
            config.ssid, config.address, config.prefix_len
        );
        Ok(())
    }

    async fn begin_join(&mut self, config: &StationConfig) -> Result<(), NetworkError> {
        match &config.static_ipv4 {
            Some(ip) => {
                let address = Ipv4Cidr::new(ip.address, ip.prefix_len);
                info!(
                    "Wi-Fi using static IPv4: addr={} prefix={} gw={}",
                    ip.address, ip.prefix_len, ip.gateway
                );
                self.sta
                    .set_config_v4(ConfigV4::Static(static_config(address, ip)));
            }
            None => {
                info!("Wi-Fi using DHCPv4 for IPv4 configuration");
                self.sta.set_config_v4(ConfigV4::Dhcp(DhcpConfig::default()));
            }
        }

        if !matches!(self.controller.is_started(), Ok(true)) {
            let mode = ModeConfig::Client(
                ClientConfig::default()
                    .with_ssid(config.ssid.clone())
                    .with_password(String::from(config.password.expose())),
            );
            self.controller.set_config(&mode).map_err(|e| {
                warn!("Wi-Fi set_config error: {:?}", e);
                NetworkError::LinkFailure("station configuration rejected")
            })?;

            info!("Starting Wi-Fi STA");
            self.controller.start_async().await.map_err(|e| {
                warn!("Wi-Fi start_async error: {:?}", e);
                NetworkError::LinkFailure("station failed to start")
            })?;
        }

        match with_timeout(self.attempt_window, self.controller.connect_async()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Wi-Fi connect_async error: {:?}", e);
                Err(NetworkError::LinkFailure("association rejected"))
            }
            // The driver keeps associating in the background; polling decides.
            Err(_) => {
                debug!("Wi-Fi association still pending");
                Ok(())
            }
        }
    }

    fn is_associated(&mut self) -> bool {
        matches!(self.controller.is_connected(), Ok(true))
    }
}

#[embassy_executor::task(pool_size = 2)]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await;
}

/// Spawn the HTTP worker pool on `stack`.
pub fn spawn_http_workers(
    spawner: &Spawner,
    stack: Stack<'static>,
    sensors: &'static Sensors,
    store: &'static Store,
) {
    info!("spawning HTTP workers (count={})", HTTP_WORKER_COUNT);
    for worker_id in 0..HTTP_WORKER_COUNT {
        spawner
            .spawn(http_worker(stack, sensors, store, worker_id))
            .expect("http_worker spawn");
    }
}

#[embassy_executor::task(pool_size = HTTP_WORKER_COUNT)]
async fn http_worker(
    stack: Stack<'static>,
    sensors: &'static Sensors,
    store: &'static Store,
    worker_id: usize,
) {
    let mut rx_buf = [0u8; 1024];
    let mut tx_buf = [0u8; 1024];
    let telemetry = TelemetryService::new(sensors, store);

    info!("HTTP worker {} starting (port={})", worker_id, HTTP_PORT);

    loop {
        stack.wait_config_up().await;

        let mut socket = TcpSocket::new(stack, &mut rx_buf, &mut tx_buf);
        socket.set_timeout(Some(Duration::from_secs(10)));

        match socket.accept(HTTP_PORT).await {
            Ok(()) => {
                if let Err(e) = serve_connection(&mut socket, &telemetry).await {
                    warn!("HTTP worker {} connection error: {:?}", worker_id, e);
                }
                socket.close();
                let _ = socket.flush().await;
            }
            Err(e) => {
                warn!("HTTP worker {} accept error: {:?}", worker_id, e);
                Timer::after(Duration::from_millis(200)).await;
            }
        }

        socket.abort();
    }
}

async fn serve_connection(
    socket: &mut TcpSocket<'_>,
    telemetry: &Telemetry,
) -> Result<(), embassy_net::tcp::Error> {
    let mut reader = RequestReader::new();
    let mut chunk = [0u8; 512];

    let response = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            if let Err(e) = reader.finish() {
                debug!("Peer closed early: {}", e);
            }
            return Ok(());
        }

        match reader.feed(&chunk[..n]) {
            Ok(Some(request)) => {
                debug!("{:?} {}", request.method, request.path);
                break telemetry.handle(&request).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Rejected request: {}", e);
                break Response::text(Status::from(e), &format!("{}", e));
            }
        }
    };

    write_all(socket, response.head().as_bytes()).await?;
    write_all(socket, &response.body).await
}

async fn write_all(
    socket: &mut TcpSocket<'_>,
    mut buf: &[u8],
) -> Result<(), embassy_net::tcp::Error> {
    while !buf.is_empty() {
        let written = socket.write(buf).await?;
        if written == 0 {
            return Err(embassy_net::tcp::Error::ConnectionReset);
        }
        buf = &buf[written..];
    }
    Ok(())
}
