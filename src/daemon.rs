//! Wiring: shared services, task threads and their control handles.

use crate::clock::LocalClock;
use crate::config::{Config, ConfigError};
use crate::console::Console;
use crate::identity::{Identity, discover_mac, parse_mac};
use crate::lights::{self, Lights, LightsEvent, LoggingGpio};
use crate::measurements::{self, Reporter, ReporterEvent};
use crate::poll::Poller;
use crate::storage::FileStore;
use crate::{Control, refresh, signal};
use crossbeam_channel::Sender;
use grpc::{Client, Endpoint, Status};
use protocol_ganymede::{
    AtmosphericMeasurements, AuthClient, AuthConfig, AuthError, Bearer, DeviceApi, StoreError,
};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tls_channel::{TlsConfig, TlsError};
use transport::{PoolConfig, TransportPool};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("tls: {0}")]
    Tls(#[from] TlsError),
    #[error("transport: {0}")]
    Transport(#[from] transport::Error),
    #[error("storage: {0}")]
    Store(#[from] StoreError),
    #[error("auth: {0}")]
    Auth(#[from] AuthError),
    #[error("rpc: {0}")]
    Status(#[from] Status),
    #[error("signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("no device.mac configured and no network interface address found")]
    NoMac,
}

/// Transport settings from the config file.
pub fn pool_config(config: &Config) -> Result<PoolConfig, TlsError> {
    let transport = &config.transport;
    let tls = match &transport.ca_file {
        Some(path) => TlsConfig::from_pem_file(path)?,
        None => TlsConfig::new(),
    };
    Ok(PoolConfig {
        tls,
        connect_timeout: Duration::from_millis(transport.connect_timeout_ms),
        handshake_timeout: Duration::from_millis(transport.handshake_timeout_ms),
        perform_timeout: Duration::from_millis(transport.perform_timeout_ms),
        ..PoolConfig::default()
    })
}

/// Everything the tasks share.
pub struct Services {
    pub config: Config,
    pub store: Arc<FileStore>,
    pub identity: Arc<Identity>,
    pub clock: Arc<LocalClock>,
    pub api: DeviceApi,
    pub auth: AuthClient,
}

impl Services {
    pub fn build(config: Config) -> Result<Self, DaemonError> {
        Self::build_with_pool(config, None)
    }

    /// As [`Services::build`], with an explicit transport configuration
    /// instead of the one derived from `config`.
    pub fn build_with_pool(
        config: Config,
        pool_override: Option<PoolConfig>,
    ) -> Result<Self, DaemonError> {
        let pool_config = match pool_override {
            Some(pool_config) => pool_config,
            None => pool_config(&config)?,
        };
        let pool = TransportPool::new(pool_config)?;

        let store = Arc::new(FileStore::open(&config.storage.path)?);

        let mac = if config.device.mac.is_empty() {
            discover_mac(Path::new("/sys/class/net")).ok_or(DaemonError::NoMac)?
        } else {
            parse_mac(&config.device.mac).ok_or(DaemonError::NoMac)?
        };
        tracing::info!(mac = %mac, "device identity");
        let identity = Arc::new(Identity::new(mac, store.clone())?);

        let api_endpoint = Endpoint::new(config.api.host.clone(), config.api.port)
            .with_authority(config.api.authority());
        let client = Client::new(pool.clone(), api_endpoint, Arc::new(Bearer(store.clone())))
            .with_response_capacity(config.api.response_capacity);
        let api = DeviceApi::new(client);

        let auth_endpoint = Endpoint::new(config.auth.host.clone(), config.auth.port);
        let auth_config = AuthConfig {
            audience: config.auth.audience.clone(),
            scope: config.auth.scope.clone(),
            ..AuthConfig::new(auth_endpoint, config.auth.client_id.clone())
        };
        let auth = AuthClient::new(pool, auth_config, store.clone());

        Ok(Self {
            config,
            store,
            identity,
            clock: Arc::new(LocalClock::new()),
            api,
            auth,
        })
    }

    pub fn poller(&self, lights: Sender<LightsEvent>) -> Poller {
        Poller::new(
            self.api.clone(),
            self.identity.clone(),
            self.store.clone(),
            self.clock.clone(),
            lights,
            Duration::from_secs(self.config.poll.period_secs),
            Duration::from_secs(self.config.poll.min_period_secs),
        )
    }
}

/// Senders that steer the running tasks.
#[derive(Clone)]
pub struct Handles {
    poll: Sender<Control>,
    refresh: Sender<Control>,
    lights: Sender<LightsEvent>,
    reporter: Option<Sender<ReporterEvent>>,
}

impl Handles {
    pub fn wake_poll(&self) {
        let _ = self.poll.send(Control::Wake);
    }

    pub fn wake_refresh(&self) {
        let _ = self.refresh.send(Control::Wake);
    }

    /// Queue a manual reading. `false` if measurements are disabled.
    pub fn push(&self, reading: AtmosphericMeasurements) -> bool {
        match &self.reporter {
            Some(reporter) => reporter.send(ReporterEvent::Reading(reading)).is_ok(),
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let _ = self.poll.send(Control::Stop);
        let _ = self.refresh.send(Control::Stop);
        let _ = self.lights.send(LightsEvent::Stop);
        if let Some(reporter) = &self.reporter {
            let _ = reporter.send(ReporterEvent::Stop);
        }
    }
}

/// The running periodic tasks.
pub struct Daemon {
    handles: Handles,
    threads: Vec<JoinHandle<()>>,
}

fn spawn<F: FnOnce() + Send + 'static>(name: &str, f: F) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name.to_string()).spawn(f)
}

impl Daemon {
    /// Start the poll, refresh, lights and measurement tasks.
    pub fn start(services: &Services) -> Result<Self, DaemonError> {
        let (poll_tx, poll_rx) = crossbeam_channel::unbounded();
        let (refresh_tx, refresh_rx) = crossbeam_channel::unbounded();
        let (lights_tx, lights_rx) = crossbeam_channel::unbounded();

        let mut threads = Vec::new();

        let clock = services.clock.clone();
        let tick = Duration::from_secs(services.config.lights.tick_secs);
        threads.push(spawn("lights", move || {
            lights::run(Lights::new(LoggingGpio::default()), clock, tick, lights_rx);
        })?);

        let poller = services.poller(lights_tx.clone());
        threads.push(spawn("poll", move || poller.run(poll_rx))?);

        let auth = services.auth.clone();
        let interval = services.config.auth.refresh_interval();
        threads.push(spawn("refresh", move || refresh::run(auth, interval, refresh_rx))?);

        let reporter_tx = if services.config.measurements.enabled {
            let (tx, rx) = crossbeam_channel::unbounded();
            let reporter = Reporter::new(services.api.clone(), services.identity.clone());
            let interval = Duration::from_secs(services.config.measurements.interval_secs);
            threads.push(spawn("measurements", move || {
                measurements::run(reporter, None, interval, rx)
            })?);
            Some(tx)
        } else {
            None
        };

        tracing::info!(tasks = threads.len(), "daemon started");
        Ok(Self {
            handles: Handles {
                poll: poll_tx,
                refresh: refresh_tx,
                lights: lights_tx,
                reporter: reporter_tx,
            },
            threads,
        })
    }

    pub fn handles(&self) -> Handles {
        self.handles.clone()
    }

    /// Wait for every task to stop.
    pub fn join(self) {
        for thread in self.threads {
            let name = thread.thread().name().unwrap_or("task").to_string();
            if thread.join().is_err() {
                tracing::error!(task = %name, "task panicked");
            }
        }
    }
}

/// Run until a signal or the console's `quit`.
pub fn run(services: Services) -> Result<(), DaemonError> {
    let daemon = Daemon::start(&services)?;

    let handles = daemon.handles();
    signal::install_signal_handler(move || handles.stop_all())?;

    let console = Console::new(daemon.handles(), services.auth.clone());
    spawn("console", move || {
        let stdin = std::io::stdin();
        if let Err(e) = console.run(stdin.lock(), std::io::stdout()) {
            tracing::warn!(error = %e, "console stopped");
        }
    })?;

    daemon.join();
    tracing::info!("daemon stopped");
    Ok(())
}

/// Run the device authorization flow once, printing the activation link.
pub fn register(services: &Services) -> Result<(), DaemonError> {
    let host = services.auth.config().endpoint.authority.clone();
    services.auth.register(|code| {
        println!(
            "visit {} and enter code {}",
            code.activation_url(&host),
            code.user_code
        );
    })?;
    println!("registered");
    Ok(())
}

/// Poll once and print what the server said.
pub fn poll_once(services: &Services) -> Result<(), DaemonError> {
    let (lights, _rx) = crossbeam_channel::unbounded();
    let response = services.poller(lights).poll_once()?;

    println!("device uid:      {}", response.device_uid);
    println!("device name:     {}", response.device_display_name);
    println!("config name:     {}", response.config_display_name);
    println!("timezone offset: {} min", response.timezone_offset_minutes);
    let luminaires = response
        .light_config
        .as_ref()
        .map_or(0, |c| c.luminaires.len());
    println!("luminaires:      {luminaires}");
    if let Some(period) = response.poll_period {
        println!("poll period:     {} s", period.seconds);
    }
    Ok(())
}

/// Refresh the access token once.
pub fn refresh_once(services: &Services) -> Result<(), DaemonError> {
    if refresh::refresh_if_registered(&services.auth)? {
        println!("access token refreshed");
    } else {
        println!("device is not registered, run `register` first");
    }
    Ok(())
}
