//! Throttle that answers rate limiting by requesting a fresh exit identity from
//! the local anonymity-network daemon instead of slowing down.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use super::Throttle;
use crate::error::ControlError;
use crate::http::HttpClient;
use crate::RotationConfig;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Line-oriented client for the daemon's control port.
#[derive(Debug, Clone)]
pub struct ControlPort {
    addr: String,
    timeout: Duration,
}

impl ControlPort {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: CONTROL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Checks that the port is reachable and accepts an empty-password login.
    pub fn probe(&self) -> Result<(), ControlError> {
        let mut session = self.connect()?;
        session.command("AUTHENTICATE \"\"", "authentication")?;
        session.quit();
        Ok(())
    }

    /// Asks the daemon to switch to new circuits.
    pub fn new_identity(&self) -> Result<(), ControlError> {
        let mut session = self.connect()?;
        session.command("AUTHENTICATE \"\"", "authentication")?;
        session.command("SIGNAL NEWNYM", "NEWNYM signal")?;
        session.quit();
        Ok(())
    }

    fn connect(&self) -> Result<ControlSession, ControlError> {
        let connect_err = |source| ControlError::Connect {
            addr: self.addr.clone(),
            source,
        };

        let sock = self
            .addr
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "address did not resolve",
                ))
            })?;

        let stream = TcpStream::connect_timeout(&sock, self.timeout).map_err(connect_err)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        Ok(ControlSession {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        })
    }
}

struct ControlSession {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl ControlSession {
    fn command(&mut self, line: &str, step: &'static str) -> Result<(), ControlError> {
        write!(self.writer, "{}\r\n", line)?;
        self.writer.flush()?;

        let mut reply = String::new();
        self.reader.read_line(&mut reply)?;
        if !reply.starts_with("250") {
            return Err(ControlError::Rejected {
                step,
                reply: reply.trim_end().to_string(),
            });
        }
        Ok(())
    }

    fn quit(&mut self) {
        let _ = write!(self.writer, "QUIT\r\n");
        let _ = self.writer.flush();
    }
}

#[derive(Debug, Clone)]
pub struct RotationSettings {
    pub control: ControlPort,
    pub ip_check_url: String,
    pub cooldown: Duration,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl From<&RotationConfig> for RotationSettings {
    fn from(cfg: &RotationConfig) -> Self {
        Self {
            control: ControlPort::new(cfg.control_addr.clone()),
            ip_check_url: cfg.ip_check_url.clone(),
            cooldown: Duration::from_secs(cfg.cooldown),
            poll_attempts: cfg.poll_attempts.max(1),
            poll_interval: Duration::from_secs(cfg.poll_interval),
        }
    }
}

struct RotationState {
    blocked: bool,
    request_count: u64,
    current_ip: Option<String>,
    episodes: u64,
}

struct Shared {
    state: Mutex<RotationState>,
    unblocked: Condvar,
    client: Arc<HttpClient>,
    settings: RotationSettings,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RotationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fetch_ip(&self) -> Result<String, reqwest::Error> {
        let body = self
            .client
            .get(&self.settings.ip_check_url)?
            .error_for_status()?
            .text()?;
        Ok(body.trim().to_string())
    }
}

pub struct RotatingThrottle {
    shared: Arc<Shared>,
}

impl RotatingThrottle {
    /// `client` must route through the anonymity network so the IP check sees
    /// the exit address.
    pub fn new(client: Arc<HttpClient>, settings: RotationSettings) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(RotationState {
                blocked: false,
                request_count: 0,
                current_ip: None,
                episodes: 0,
            }),
            unblocked: Condvar::new(),
            client,
            settings,
        });

        match shared.fetch_ip() {
            Ok(ip) => {
                info!("[Rotation] Started, current exit IP {}", ip);
                shared.lock().current_ip = Some(ip);
            }
            Err(e) => warn!("[Rotation] Unable to determine current exit IP: {}", e),
        }

        Self { shared }
    }

    pub fn current_ip(&self) -> Option<String> {
        self.shared.lock().current_ip.clone()
    }
}

impl Throttle for RotatingThrottle {
    fn wait(&self) {
        let mut state = self.shared.lock();
        while state.blocked {
            state = self
                .shared
                .unblocked
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        state.request_count += 1;
    }

    fn trigger(&self) {
        {
            let mut state = self.shared.lock();
            if state.blocked {
                return;
            }
            state.blocked = true;
            state.episodes += 1;
            warn!(
                "[Rotation] Rate limit detected after {} request(s), pausing workers for {:?}",
                state.request_count, self.shared.settings.cooldown
            );
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("identity-rotation".to_string())
            .spawn(move || rotate(shared));

        if let Err(e) = spawned {
            error!("[Rotation] Failed to start rotation, resuming immediately: {}", e);
            resume(&self.shared, None);
        }
    }

    // Rotation does not depend on observed recovery.
    fn mark_recovered(&self) {}

    fn is_blocked(&self) -> bool {
        self.shared.lock().blocked
    }

    fn episodes(&self) -> u64 {
        self.shared.lock().episodes
    }
}

fn rotate(shared: Arc<Shared>) {
    let settings = &shared.settings;
    thread::sleep(settings.cooldown);

    let new_ip = match settings.control.new_identity() {
        Ok(()) => {
            info!("[Rotation] Requested a new identity via {}", settings.control.addr());
            poll_new_ip(&shared)
        }
        Err(e) => {
            error!("[Rotation] Identity change failed, resuming with the current one: {}", e);
            None
        }
    };

    resume(&shared, new_ip);
}

/// Polls the IP endpoint until the address differs from the recorded one or
/// the attempts run out. Returns the last address seen.
fn poll_new_ip(shared: &Shared) -> Option<String> {
    let settings = &shared.settings;
    let previous = shared.lock().current_ip.clone();
    let mut seen = None;

    for attempt in 1..=settings.poll_attempts {
        match shared.fetch_ip() {
            Ok(ip) => {
                if previous.as_deref() != Some(ip.as_str()) {
                    return Some(ip);
                }
                warn!("[Rotation] IP unchanged ({}), retrying...", ip);
                seen = Some(ip);
            }
            Err(e) => warn!("[Rotation] Unable to retrieve IP: {}", e),
        }
        if attempt < settings.poll_attempts {
            thread::sleep(settings.poll_interval);
        }
    }
    seen
}

fn resume(shared: &Shared, new_ip: Option<String>) {
    {
        let mut state = shared.lock();
        state.blocked = false;
        state.request_count = 0;
        if new_ip.is_some() {
            state.current_ip = new_ip;
        }
        info!(
            "[Rotation] Cooldown complete, resuming with exit IP {}",
            state.current_ip.as_deref().unwrap_or("unknown")
        );
    }
    shared.unblocked.notify_all();
}
