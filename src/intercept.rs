//! The boundary to the interception engine.
//!
//! `Interceptor` owns the grabbed devices and runs the dispatch loop in
//! its own execution context (one worker thread per device), invoking the
//! registered receiver for every signal. In blocking mode the devices are
//! grabbed exclusively and signals the receiver passes through are
//! re-injected via a uinput virtual keyboard.
//!
//! Teardown order matters: interception is always disabled (workers
//! joined, devices released) before the interceptor itself goes away.
//! `disable` does that explicitly and `Drop` falls back to it, so the
//! misordered case cannot be reached.

use anyhow::{Context, Result, bail};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, Device, EventSummary, EventType, InputEvent, KeyCode};
use std::collections::HashSet;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::signal::{KeyApply, Mods, Signal, SignalReceiver};

/// How long an idle worker sleeps before polling its device again.
const IDLE_WAIT: Duration = Duration::from_millis(10);

pub struct Interceptor {
    receiver: Option<Arc<dyn SignalReceiver>>,
    devices: Vec<(PathBuf, Device)>,
    keys_only: bool,
    block: bool,
    mangle: bool,
    mods: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
    enabled: bool,
}

impl Interceptor {
    pub fn new(keys_only: bool, block: bool, mangle: bool) -> Self {
        Self {
            receiver: None,
            devices: Vec::new(),
            keys_only,
            block,
            mangle,
            mods: Arc::new(AtomicU32::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            enabled: false,
        }
    }

    /// Register the signal receiver. Must happen before `enable`.
    pub fn set_receiver(&mut self, receiver: Arc<dyn SignalReceiver>) {
        self.receiver = Some(receiver);
    }

    /// Open the devices to intercept. Paths that cannot be opened are
    /// reported and skipped; it is an error if none of them could be.
    pub fn set_grabs(&mut self, paths: &[PathBuf]) -> Result<()> {
        let names: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        println!("🎯 Intercept list: {}", names.join(", "));
        for path in paths {
            match Device::open(path) {
                Ok(device) => self.devices.push((path.clone(), device)),
                Err(e) => eprintln!("⚠️  Skipping {}: {e}", path.display()),
            }
        }
        if self.devices.is_empty() && !paths.is_empty() {
            bail!("none of the requested devices could be opened");
        }
        Ok(())
    }

    /// Number of devices that will be watched once enabled.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Enable interception: grab the devices (in blocking mode) and start
    /// one dispatch worker per device. Devices that cannot be prepared are
    /// reported and dropped rather than aborting the rest.
    pub fn enable(&mut self) -> Result<()> {
        if self.enabled {
            return Ok(());
        }
        let receiver = self
            .receiver
            .clone()
            .context("no signal receiver registered")?;
        let injector = if self.block && !self.devices.is_empty() {
            Some(Arc::new(Mutex::new(KeyInjector::new()?)))
        } else {
            None
        };
        self.stop.store(false, Ordering::Relaxed);
        for (path, mut device) in self.devices.drain(..) {
            if let Err(e) = set_nonblocking(&device) {
                eprintln!("⚠️  Skipping {}: {e:#}", path.display());
                continue;
            }
            if self.block {
                if let Err(e) = device.grab() {
                    eprintln!("⚠️  Cannot grab {}: {e}", path.display());
                    continue;
                }
            }
            let worker = DispatchWorker {
                path,
                receiver: Arc::clone(&receiver),
                injector: injector.clone(),
                keys_only: self.keys_only,
                mangle: self.mangle,
                grabbed: self.block,
                mods: Arc::clone(&self.mods),
                stop: Arc::clone(&self.stop),
            };
            self.workers.push(thread::spawn(move || worker.run(device)));
        }
        self.enabled = true;
        Ok(())
    }

    /// Disable interception: stop and join the workers. Each worker
    /// releases its grab on the way out.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.stop.store(true, Ordering::Relaxed);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.enabled = false;
    }
}

impl Drop for Interceptor {
    fn drop(&mut self) {
        self.disable();
    }
}

struct DispatchWorker {
    path: PathBuf,
    receiver: Arc<dyn SignalReceiver>,
    injector: Option<Arc<Mutex<KeyInjector>>>,
    keys_only: bool,
    mangle: bool,
    grabbed: bool,
    mods: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
}

impl DispatchWorker {
    fn run(self, mut device: Device) {
        while !self.stop.load(Ordering::Relaxed) {
            match device.fetch_events() {
                Ok(events) => {
                    for event in events {
                        self.dispatch(event);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(IDLE_WAIT),
                Err(e) => {
                    eprintln!("⚠️  Lost {}: {e}", self.path.display());
                    break;
                }
            }
        }
        if self.grabbed {
            let _ = device.ungrab();
        }
    }

    fn dispatch(&self, event: InputEvent) {
        match event.destructure() {
            // Sync markers delimit batches; they are not input signals.
            EventSummary::Synchronization(..) => {}
            EventSummary::Key(_, code, value) => {
                let Some(apply) = KeyApply::from_event_value(value) else {
                    eprintln!(
                        "⚠️  Dropping malformed key signal (code {}, value {value})",
                        code.code()
                    );
                    return;
                };
                self.track_mods(code, apply);
                let signal = Signal::Key { code, apply };
                let forward = self.receiver.receive(&signal, self.current_mods());
                self.inject(injection_for(&signal, forward, self.mangle));
            }
            _ => {
                if self.keys_only {
                    return;
                }
                let signal = Signal::Other {
                    kind: event.event_type(),
                    code: event.code(),
                    value: event.value(),
                };
                let forward = self.receiver.receive(&signal, self.current_mods());
                self.inject(injection_for(&signal, forward, self.mangle));
            }
        }
    }

    fn inject(&self, signal: Option<Signal>) {
        let (Some(injector), Some(signal)) = (&self.injector, signal) else {
            return;
        };
        if let Err(e) = injector.lock().unwrap().inject(&signal) {
            eprintln!("⚠️  Re-injection failed: {e:#}");
        }
    }

    fn track_mods(&self, code: KeyCode, apply: KeyApply) {
        let Some(bit) = Mods::bit_for(code) else {
            return;
        };
        match apply {
            KeyApply::Set => {
                self.mods.fetch_or(bit.bits(), Ordering::Relaxed);
            }
            KeyApply::Unset => {
                self.mods.fetch_and(!bit.bits(), Ordering::Relaxed);
            }
            // Autorepeat keeps the modifier held; toggles never come from
            // physical devices.
            KeyApply::Both | KeyApply::Toggle => {}
        }
    }

    fn current_mods(&self) -> Mods {
        Mods::from_bits_truncate(self.mods.load(Ordering::Relaxed))
    }
}

/// What, if anything, goes back out through the injector for a dispatched
/// signal. Mangling replaces the key with its neighbor; otherwise the
/// receiver's pass-through verdict decides.
fn injection_for(signal: &Signal, forward: bool, mangle: bool) -> Option<Signal> {
    match signal {
        Signal::Key { code, apply } if mangle => Some(Signal::Key {
            code: KeyCode::new(code.code().wrapping_add(1)),
            apply: *apply,
        }),
        _ if forward => Some(*signal),
        _ => None,
    }
}

/// Uinput virtual keyboard used for pass-through re-injection.
struct KeyInjector {
    device: VirtualDevice,
    pressed: HashSet<u16>,
}

impl KeyInjector {
    fn new() -> Result<Self> {
        let mut keys = AttributeSet::<KeyCode>::new();
        for code in 1..=0x2ff {
            keys.insert(KeyCode::new(code));
        }
        let device = VirtualDeviceBuilder::new()
            .context("cannot reach uinput")?
            .name("pressq injector")
            .with_keys(&keys)
            .context("cannot declare key capabilities")?
            .build()
            .context("cannot create virtual keyboard")?;
        Ok(Self {
            device,
            pressed: HashSet::new(),
        })
    }

    fn inject(&mut self, signal: &Signal) -> Result<()> {
        // The virtual device only carries key capabilities.
        let Signal::Key { code, apply } = signal else {
            return Ok(());
        };
        let code = code.code();
        let values: &[i32] = match apply {
            KeyApply::Set => &[1],
            KeyApply::Unset => &[0],
            KeyApply::Both => &[1, 0],
            KeyApply::Toggle => {
                if self.pressed.contains(&code) {
                    &[0]
                } else {
                    &[1]
                }
            }
        };
        for &value in values {
            if value == 1 {
                self.pressed.insert(code);
            } else {
                self.pressed.remove(&code);
            }
            let event = InputEvent::new(EventType::KEY.0, code, value);
            self.device
                .emit(&[event])
                .context("uinput emit failed")?;
        }
        Ok(())
    }
}

fn set_nonblocking(device: &Device) -> Result<()> {
    let fd = device.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error()).context("fcntl(F_GETFL) failed");
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error()).context("fcntl(F_SETFL, O_NONBLOCK) failed");
    }
    Ok(())
}
