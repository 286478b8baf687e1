//! Proxy-bound HTTP sessions
//!
//! Every session owns one `reqwest::Client` routed through one outbound
//! circuit. Rotation rebuilds the client with fresh SOCKS isolation
//! credentials so the daemon builds a new circuit for this session only, and
//! signals the control port when one is configured. The session object itself
//! survives rotation.

use crate::config::{CircuitConfig, Config};
use crate::session::control::{CircuitControl, NoControl, TorControl};
use crate::session::SessionError;
use reqwest::{redirect::Policy, Client, Proxy};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use url::Url;

/// Settings shared by every client a session builds
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub user_agent: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Minimum spacing between two rotations of one circuit
    pub rotation_interval: Duration,
    /// Proactive rotation threshold in successful requests (0 disables)
    pub rotate_after_requests: u32,
    /// Generation of the first client; isolation credentials of earlier
    /// processes are never reused
    pub identity_seed: u64,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        // Format: CrawlerName/Version (+ContactURL; ContactEmail)
        let user_agent = format!(
            "{}/{} (+{}; {})",
            config.user_agent.crawler_name,
            config.user_agent.crawler_version,
            config.user_agent.contact_url,
            config.user_agent.contact_email
        );

        Self {
            user_agent,
            request_timeout: Duration::from_secs(config.harvest.request_timeout),
            connect_timeout: Duration::from_secs(config.harvest.connect_timeout),
            rotation_interval: Duration::from_millis(config.tor.rotation_interval),
            rotate_after_requests: config.tor.rotate_after_requests,
            identity_seed: process_seed(),
        }
    }
}

/// Per-process starting generation, from the wall clock in milliseconds
fn process_seed() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// A client and the circuit generation it was built for
#[derive(Clone)]
struct Identity {
    client: Client,
    generation: u64,
}

/// One HTTP client bound to one circuit
pub struct Session {
    index: usize,
    proxy: Option<Url>,
    settings: ClientSettings,
    control: Arc<dyn CircuitControl>,
    identity: RwLock<Identity>,
    /// Held while a request is on the wire; one request per circuit at a time
    circuit: Mutex<()>,
    /// Serializes rotations and remembers when the last one happened
    last_rotation: Mutex<Option<Instant>>,
    rotations: AtomicU64,
    successes: AtomicU32,
}

impl Session {
    pub fn new(
        index: usize,
        proxy: Option<&str>,
        settings: ClientSettings,
        control: Arc<dyn CircuitControl>,
    ) -> Result<Self, SessionError> {
        let proxy = proxy
            .map(|p| Url::parse(p).map_err(|e| SessionError::InvalidProxy(format!("{}: {}", p, e))))
            .transpose()?;
        let generation = settings.identity_seed;
        let client = build_client(&settings, proxy.as_ref(), index, generation)?;

        Ok(Self {
            index,
            proxy,
            settings,
            control,
            identity: RwLock::new(Identity { client, generation }),
            circuit: Mutex::new(()),
            last_rotation: Mutex::new(None),
            rotations: AtomicU64::new(0),
            successes: AtomicU32::new(0),
        })
    }

    /// Circuit index this session is bound to
    pub fn index(&self) -> usize {
        self.index
    }

    /// Identity generation, bumped by every rotation
    pub fn generation(&self) -> u64 {
        self.client_and_generation().1
    }

    /// Number of rotations performed so far
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::SeqCst)
    }

    /// Current client; cheap to clone
    pub fn client(&self) -> Client {
        self.client_and_generation().0
    }

    /// Current client together with the generation it belongs to
    ///
    /// Both are read under one lock, so a failure on this client can be
    /// reported against the right generation.
    pub fn client_and_generation(&self) -> (Client, u64) {
        let identity = match self.identity.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        (identity.client, identity.generation)
    }

    /// Exclusive use of the circuit for one request
    pub async fn lock_circuit(&self) -> MutexGuard<'_, ()> {
        self.circuit.lock().await
    }

    /// Records a successful request; true once a proactive rotation is due
    pub fn record_success(&self) -> bool {
        let threshold = self.settings.rotate_after_requests;
        let count = self.successes.fetch_add(1, Ordering::SeqCst) + 1;
        threshold > 0 && count >= threshold
    }

    /// Rotates the circuit unconditionally
    pub async fn rotate(&self) -> Result<(), SessionError> {
        let generation = self.generation();
        self.rotate_from(generation).await.map(|_| ())
    }

    /// Rotates the circuit unless it already moved past `observed`
    ///
    /// Concurrent callers that saw a failure on the same generation collapse
    /// into a single rotation. Returns whether this call rotated.
    pub async fn rotate_from(&self, observed: u64) -> Result<bool, SessionError> {
        let mut last_rotation = self.last_rotation.lock().await;

        if self.generation() != observed {
            tracing::debug!(
                "Circuit {} already rotated past generation {}",
                self.index,
                observed
            );
            return Ok(false);
        }

        if let Some(last) = *last_rotation {
            let elapsed = last.elapsed();
            if elapsed < self.settings.rotation_interval {
                tokio::time::sleep(self.settings.rotation_interval - elapsed).await;
            }
        }

        if let Err(e) = self.control.new_identity(self.index).await {
            tracing::warn!("Control port signal failed for circuit {}: {}", self.index, e);
        }

        let next = observed + 1;
        let client = build_client(&self.settings, self.proxy.as_ref(), self.index, next)?;
        let identity = Identity {
            client,
            generation: next,
        };
        match self.identity.write() {
            Ok(mut guard) => *guard = identity,
            Err(poisoned) => *poisoned.into_inner() = identity,
        }

        self.rotations.fetch_add(1, Ordering::SeqCst);
        self.successes.store(0, Ordering::SeqCst);
        *last_rotation = Some(Instant::now());

        tracing::info!("Rotated circuit {} to generation {}", self.index, next);
        Ok(true)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("index", &self.index)
            .field("proxy", &self.proxy.as_ref().map(Url::as_str))
            .field("generation", &self.generation())
            .finish()
    }
}

/// Builds the client for one circuit generation
///
/// SOCKS proxies get `circuit-<index>` / `<generation>` credentials; the
/// daemon isolates streams with distinct credentials onto distinct circuits.
fn build_client(
    settings: &ClientSettings,
    proxy: Option<&Url>,
    index: usize,
    generation: u64,
) -> Result<Client, SessionError> {
    let mut builder = Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(settings.request_timeout)
        .connect_timeout(settings.connect_timeout)
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy_url) = proxy {
        let username = format!("circuit-{}", index);
        let password = generation.to_string();

        let proxy = if proxy_url.scheme().starts_with("socks") {
            let mut isolated = proxy_url.clone();
            isolated
                .set_username(&username)
                .and_then(|_| isolated.set_password(Some(&password)))
                .map_err(|_| SessionError::InvalidProxy(proxy_url.to_string()))?;
            Proxy::all(isolated.as_str())?
        } else {
            Proxy::all(proxy_url.as_str())?.basic_auth(&username, &password)
        };
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Fixed set of sessions, one per circuit
pub struct SessionPool {
    sessions: Vec<Arc<Session>>,
}

impl SessionPool {
    /// Builds one session per `[[circuit]]` entry
    ///
    /// Each circuit signals its own control address, falling back to the
    /// shared `[tor]` one; without either, rotation relies on isolation only.
    pub fn from_config(config: &Config) -> Result<Self, SessionError> {
        let settings = ClientSettings::from_config(config);
        let sessions = config
            .circuits
            .iter()
            .enumerate()
            .map(|(index, circuit)| {
                let control = control_for(circuit, config);
                Session::new(index, circuit.proxy.as_deref(), settings.clone(), control)
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { sessions })
    }

    /// Builds the pool with one control shared by every circuit
    pub fn with_control(
        config: &Config,
        control: Arc<dyn CircuitControl>,
    ) -> Result<Self, SessionError> {
        let settings = ClientSettings::from_config(config);
        let sessions = config
            .circuits
            .iter()
            .enumerate()
            .map(|(index, circuit)| {
                Session::new(
                    index,
                    circuit.proxy.as_deref(),
                    settings.clone(),
                    control.clone(),
                )
                .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { sessions })
    }

    /// Pool size, which is also the shard count
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Hands out the session bound to circuit `index`
    pub fn acquire(&self, index: usize) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .get(index)
            .cloned()
            .ok_or(SessionError::UnknownCircuit {
                index,
                size: self.sessions.len(),
            })
    }

    /// Forces a fresh identity for circuit `index`
    pub async fn rotate(&self, index: usize) -> Result<(), SessionError> {
        self.acquire(index)?.rotate().await
    }
}

fn control_for(circuit: &CircuitConfig, config: &Config) -> Arc<dyn CircuitControl> {
    match circuit
        .control_address
        .as_ref()
        .or(config.tor.control_address.as_ref())
    {
        Some(address) => Arc::new(TorControl::new(
            address.clone(),
            config.tor.control_password.clone(),
        )),
        None => Arc::new(NoControl),
    }
}
