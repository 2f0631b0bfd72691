// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! G-Mode hotkey capture from the raw keyboard event device.
//!
//! The G15's G-Mode key arrives on the built-in keyboard as `KEY_PROG1`. The
//! listener finds that keyboard in `/proc/bus/input/devices`, reads
//! `input_event` records from its `/dev/input/eventN` node on a background
//! thread and fires a callback on every key press. The feature is optional:
//! a missing device or a permission error leaves the listener inert.

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

pub const INPUT_DEVICES_PATH: &str = "/proc/bus/input/devices";

/// `EV_KEY` from `linux/input-event-codes.h`.
pub const EV_KEY: u16 = 0x01;

/// `KEY_PROG1`, emitted by the G-Mode key.
pub const KEY_PROG1: u16 = 148;

/// Size of `struct input_event` on 64-bit Linux.
pub const INPUT_EVENT_SIZE: usize = 24;

/// Upper bound on how long `stop()` waits for the reader to notice.
const POLL_TIMEOUT_MS: u16 = 1000;

/// Callback run on every G-Mode key press.
pub type KeyCallback = Arc<dyn Fn() + Send + Sync>;

/// A decoded `struct input_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub sec: i64,
    pub usec: i64,
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    pub fn decode(buf: &[u8; INPUT_EVENT_SIZE]) -> Self {
        let i64_at = |o: usize| i64::from_ne_bytes(buf[o..o + 8].try_into().unwrap_or_default());
        Self {
            sec: i64_at(0),
            usec: i64_at(8),
            kind: u16::from_ne_bytes([buf[16], buf[17]]),
            code: u16::from_ne_bytes([buf[18], buf[19]]),
            value: i32::from_ne_bytes([buf[20], buf[21], buf[22], buf[23]]),
        }
    }

    /// Press edge of `key` (value 1); releases (0) and autorepeat (2) don't count.
    pub fn is_press_of(&self, key: u16) -> bool {
        self.kind == EV_KEY && self.code == key && self.value == 1
    }
}

/// Find the event node of the first input device whose name contains `name`.
pub fn find_keyboard(devices_listing: &str, name: &str) -> Option<PathBuf> {
    for block in devices_listing.split("\n\n") {
        let mut device_name = None;
        let mut event = None;

        for line in block.lines() {
            if let Some(n) = line.strip_prefix("N: Name=") {
                device_name = Some(n.trim().trim_matches('"'));
            } else if let Some(handlers) = line.strip_prefix("H: Handlers=") {
                event = handlers.split_whitespace().find(|h| h.starts_with("event"));
            }
        }

        if let (Some(n), Some(ev)) = (device_name, event) {
            if n.contains(name) {
                return Some(Path::new("/dev/input").join(ev));
            }
        }
    }
    None
}

/// Background reader for the G-Mode key.
pub struct KeyListener {
    devices_path: PathBuf,
    keyboard_name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl KeyListener {
    pub fn new(keyboard_name: impl Into<String>) -> Self {
        Self::with_devices_path(INPUT_DEVICES_PATH, keyboard_name)
    }

    pub fn with_devices_path(devices_path: impl Into<PathBuf>, keyboard_name: impl Into<String>) -> Self {
        Self {
            devices_path: devices_path.into(),
            keyboard_name: keyboard_name.into(),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Locate the keyboard and start listening. Returns whether the listener
    /// is active; every failure is logged and leaves it inert.
    pub fn start(&mut self, callback: KeyCallback) -> bool {
        let listing = match fs::read_to_string(&self.devices_path) {
            Ok(l) => l,
            Err(e) => {
                log::error!("Error reading {}: {e}", self.devices_path.display());
                return false;
            }
        };
        let Some(device) = find_keyboard(&listing, &self.keyboard_name) else {
            log::warn!("Keyboard device not found - G-Mode key capture disabled");
            return false;
        };
        self.start_on(&device, callback)
    }

    /// Start listening on a specific event device.
    pub fn start_on(&mut self, device: &Path, callback: KeyCallback) -> bool {
        if self.is_running() {
            return true;
        }

        let file = match File::open(device) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                log::error!("Permission denied reading {} - G-Mode key disabled", device.display());
                return false;
            }
            Err(e) => {
                log::error!("Cannot open {}: {e}", device.display());
                return false;
            }
        };

        log::info!("Listening for G-Mode key on {}", device.display());
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        self.handle = Some(thread::spawn(move || {
            if let Err(e) = read_events(file, &running, &callback) {
                log::error!("G-Mode key listener stopped: {e}");
            }
            running.store(false, Ordering::SeqCst);
        }));
        true
    }

    /// Signal the reader to exit and wait for it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("G-Mode key listener thread panicked");
            }
        }
    }
}

impl Drop for KeyListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_events(mut file: File, running: &AtomicBool, callback: &KeyCallback) -> io::Result<()> {
    let mut buf = [0u8; INPUT_EVENT_SIZE];

    while running.load(Ordering::SeqCst) {
        let ready = {
            let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(POLL_TIMEOUT_MS)) {
                Ok(n) => n > 0,
                Err(nix::errno::Errno::EINTR) => false,
                Err(e) => return Err(io::Error::from(e)),
            }
        };
        if !ready {
            continue;
        }

        match file.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                log::warn!("Keyboard device closed");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        if InputEvent::decode(&buf).is_press_of(KEY_PROG1) {
            log::info!("G-Mode key pressed");
            let cb = callback.clone();
            thread::spawn(move || cb());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    const LISTING: &str = "\
I: Bus=0019 Vendor=0000 Product=0001 Version=0000
N: Name=\"Power Button\"
P: Phys=PNP0C0C/button/input0
H: Handlers=kbd event0
B: EV=3

I: Bus=0011 Vendor=0001 Product=0001 Version=ab41
N: Name=\"AT Translated Set 2 keyboard\"
P: Phys=isa0060/serio0/input0
H: Handlers=sysrq kbd leds event3
B: EV=120013
";

    fn encode(kind: u16, code: u16, value: i32) -> Vec<u8> {
        let mut out = Vec::with_capacity(INPUT_EVENT_SIZE);
        out.extend_from_slice(&1_700_000_000i64.to_ne_bytes());
        out.extend_from_slice(&250i64.to_ne_bytes());
        out.extend_from_slice(&kind.to_ne_bytes());
        out.extend_from_slice(&code.to_ne_bytes());
        out.extend_from_slice(&value.to_ne_bytes());
        out
    }

    #[test]
    fn test_find_keyboard() {
        assert_eq!(
            find_keyboard(LISTING, "AT Translated Set 2 keyboard"),
            Some(PathBuf::from("/dev/input/event3"))
        );
        assert_eq!(find_keyboard(LISTING, "Dell WMI hotkeys"), None);
    }

    #[test]
    fn test_decode_event() {
        let raw: [u8; INPUT_EVENT_SIZE] = encode(EV_KEY, KEY_PROG1, 1).try_into().unwrap();
        let ev = InputEvent::decode(&raw);
        assert_eq!(ev.sec, 1_700_000_000);
        assert_eq!(ev.usec, 250);
        assert!(ev.is_press_of(KEY_PROG1));
    }

    #[test]
    fn test_only_press_edge_counts() {
        for (kind, code, value) in [
            (EV_KEY, KEY_PROG1, 0),
            (EV_KEY, KEY_PROG1, 2),
            (EV_KEY, 30, 1),
            (0x04, KEY_PROG1, 1),
        ] {
            let raw: [u8; INPUT_EVENT_SIZE] = encode(kind, code, value).try_into().unwrap();
            assert!(!InputEvent::decode(&raw).is_press_of(KEY_PROG1));
        }
    }

    #[test]
    fn test_listener_fires_once_per_press() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("event3");
        let mut stream = Vec::new();
        stream.extend(encode(EV_KEY, KEY_PROG1, 1));
        stream.extend(encode(EV_KEY, KEY_PROG1, 2));
        stream.extend(encode(EV_KEY, KEY_PROG1, 0));
        stream.extend(encode(EV_KEY, 30, 1));
        fs::write(&device, stream).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let mut listener = KeyListener::new("unused");
        assert!(listener.start_on(&device, Arc::new(move || {
            tx.lock().unwrap().send(()).unwrap();
        })));

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        listener.stop();
        assert!(!listener.is_running());
    }

    #[test]
    fn test_missing_keyboard_stays_inert() {
        let dir = tempfile::tempdir().unwrap();
        let devices = dir.path().join("devices");
        fs::write(&devices, LISTING).unwrap();
        let mut listener = KeyListener::with_devices_path(&devices, "No Such Keyboard");
        assert!(!listener.start(Arc::new(|| {})));
        assert!(!listener.is_running());
    }
}
