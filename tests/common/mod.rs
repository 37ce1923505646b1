//! Deterministic fakes for the manager's host seams.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use loop_wifi::{
    Clock, CommandOutput, CommandRunner, Dependencies, FileSystem, HotspotConfigSet,
    ManagerSettings, RunFailure, WifiManager,
};

pub const HOSTAPD_CONF: &str = "/etc/hostapd/hostapd.conf";
pub const DNSMASQ_CONF: &str = "/etc/dnsmasq.conf";

pub const DEVICE_LIST: &[&str] = &["nmcli", "-t", "-f", "DEVICE,TYPE,STATE", "device"];
pub const DEVICE_SHOW: &[&str] = &["nmcli", "-t", "device", "show"];
pub const WIFI_CONNECT: &[&str] = &["nmcli", "-w", "10", "device", "wifi", "connect"];
pub const CONNECTION_UP: &[&str] = &["nmcli", "-w", "10", "connection", "up"];
pub const ACTIVE_LIST: &[&str] = &["nmcli", "-t", "-f", "IN-USE,SSID,SIGNAL"];
pub const SCAN_LIST: &[&str] = &["nmcli", "-t", "-f", "SSID,SIGNAL,SECURITY"];
pub const IS_ACTIVE: &[&str] = &["systemctl", "is-active"];

pub fn ok(stdout: &str) -> Reply {
    Reply::Output(CommandOutput {
        status: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    })
}

pub fn fail(status: i32, stderr: &str) -> Reply {
    Reply::Output(CommandOutput {
        status,
        stdout: String::new(),
        stderr: stderr.to_string(),
    })
}

pub fn device_connected(connection: &str, ip: &str) -> String {
    format!(
        "GENERAL.DEVICE:wlan0\nGENERAL.TYPE:wifi\nGENERAL.STATE:100 (connected)\n\
         GENERAL.CONNECTION:{connection}\nIP4.ADDRESS[1]:{ip}/24\nIP4.GATEWAY:192.168.1.1\n"
    )
}

pub const DEVICE_CONFIGURING: &str =
    "GENERAL.DEVICE:wlan0\nGENERAL.STATE:70 (connecting (getting IP configuration))\nGENERAL.CONNECTION:--\n";

pub const DEVICE_DISCONNECTED: &str =
    "GENERAL.DEVICE:wlan0\nGENERAL.STATE:30 (disconnected)\nGENERAL.CONNECTION:--\n";

/// Blocks a fake command until the test lets it through.
#[derive(Default)]
pub struct Gate {
    state: Mutex<(bool, bool)>,
    changed: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Waits until some command is parked at the gate.
    pub fn wait_entered(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.0 {
            state = self.changed.wait(state).unwrap();
        }
    }

    pub fn release(&self) {
        self.state.lock().unwrap().1 = true;
        self.changed.notify_all();
    }

    fn pass(&self) {
        let mut state = self.state.lock().unwrap();
        state.0 = true;
        self.changed.notify_all();
        while !state.1 {
            state = self.changed.wait(state).unwrap();
        }
    }
}

type Script = Arc<dyn Fn(&[&str]) -> Reply + Send + Sync>;

#[derive(Clone)]
pub enum Reply {
    Output(CommandOutput),
    Timeout,
    /// Waits at the gate, then succeeds with no output.
    Gate(Arc<Gate>),
    Script(Script),
}

struct Rule {
    prefix: Vec<String>,
    replies: VecDeque<Reply>,
}

/// Command runner answering from rules keyed by argv prefix.
///
/// The longest matching prefix wins. Each rule replays its replies in order
/// and repeats the last one forever. Anything unmatched exits 0 with no
/// output.
#[derive(Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, prefix: &[&str], reply: Reply) -> &Self {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|r| r.prefix == prefix) {
            Some(rule) => rule.replies.push_back(reply),
            None => rules.push(Rule {
                prefix: prefix.iter().map(|s| s.to_string()).collect(),
                replies: VecDeque::from([reply]),
            }),
        }
        self
    }

    pub fn script<F>(&self, prefix: &[&str], f: F) -> &Self
    where
        F: Fn(&[&str]) -> Reply + Send + Sync + 'static,
    {
        self.on(prefix, Reply::Script(Arc::new(f)))
    }

    /// Every call so far, each joined with spaces.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.join(" ")).collect()
    }

    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| starts_with(call, prefix))
            .count()
    }

    /// Position of the first call starting with `prefix`.
    pub fn position(&self, prefix: &[&str]) -> Option<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .position(|call| starts_with(call, prefix))
    }

    fn next_reply(&self, argv: &[&str]) -> Option<Reply> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .filter(|r| r.prefix.len() <= argv.len() && r.prefix.iter().zip(argv).all(|(p, a)| p == a))
            .max_by_key(|r| r.prefix.len())?;
        if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        }
    }
}

fn starts_with(call: &[String], prefix: &[&str]) -> bool {
    call.len() >= prefix.len() && call.iter().zip(prefix).all(|(c, p)| c == p)
}

impl CommandRunner for FakeRunner {
    fn run(&self, argv: &[&str], _timeout: Duration) -> Result<CommandOutput, RunFailure> {
        self.calls
            .lock()
            .unwrap()
            .push(argv.iter().map(|s| s.to_string()).collect());

        let mut reply = self.next_reply(argv);
        while let Some(Reply::Script(script)) = reply {
            reply = Some(script(argv));
        }

        match reply {
            None => Ok(CommandOutput::default()),
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Timeout) => Err(RunFailure::TimedOut),
            Some(Reply::Gate(gate)) => {
                gate.pass();
                Ok(CommandOutput::default())
            }
            Some(Reply::Script(_)) => unreachable!(),
        }
    }
}

/// In-memory filesystem. Directories exist once added, or once a file
/// is written below them.
#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    dirs: Mutex<BTreeSet<PathBuf>>,
}

impl MemoryFs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut dirs = self.dirs.lock().unwrap();
        for ancestor in path.as_ref().ancestors() {
            dirs.insert(ancestor.to_path_buf());
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, contents: &[u8]) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_vec());
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path.as_ref()).cloned()
    }

    pub fn text(&self, path: impl AsRef<Path>) -> Option<String> {
        self.contents(path).map(|b| String::from_utf8_lossy(&b).into_owned())
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, path.display().to_string())
}

impl FileSystem for MemoryFs {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<String>> {
        if !self.dirs.lock().unwrap().contains(dir) {
            return Err(not_found(dir));
        }
        let mut paths: Vec<PathBuf> = self.dirs.lock().unwrap().iter().cloned().collect();
        paths.extend(self.files.lock().unwrap().keys().cloned());

        let mut names = BTreeSet::new();
        for path in &paths {
            if path.parent() == Some(dir) {
                if let Some(name) = path.file_name() {
                    names.insert(name.to_string_lossy().into_owned());
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    fn exists(&self, path: &Path) -> bool {
        let is_file = self.files.lock().unwrap().contains_key(path);
        is_file || self.dirs.lock().unwrap().contains(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.contents(path).ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        let contents = self.read(from)?;
        self.add_file(to, &contents);
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }
}

/// Clock that only moves when slept on or advanced.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

pub fn settings() -> ManagerSettings {
    ManagerSettings {
        command_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(10),
        scan_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_secs(1),
        interface_cache_ttl: Duration::from_secs(60),
        service_grace: Duration::from_secs(3),
        scan_settle: Duration::ZERO,
        hotspot_files: HotspotConfigSet::new(HOSTAPD_CONF, DNSMASQ_CONF),
    }
}

pub struct Harness {
    pub runner: Arc<FakeRunner>,
    pub fs: Arc<MemoryFs>,
    pub clock: Arc<ManualClock>,
    pub manager: WifiManager,
}

/// A manager over fakes with NetworkManager reporting `wlan0`.
pub fn harness() -> Harness {
    let h = bare_harness();
    h.runner.on(DEVICE_LIST, ok("eth0:ethernet:connected\nwlan0:wifi:disconnected\n"));
    h
}

/// A manager over fakes with no interface configured.
pub fn bare_harness() -> Harness {
    let runner = FakeRunner::new();
    let fs = MemoryFs::new();
    let clock = ManualClock::new();
    let manager = WifiManager::new(
        settings(),
        Dependencies {
            runner: runner.clone(),
            fs: fs.clone(),
            clock: clock.clone(),
        },
    );
    Harness {
        runner,
        fs,
        clock,
        manager,
    }
}

/// Both daemons report `active`.
pub fn daemons_up(runner: &FakeRunner) {
    runner.on(IS_ACTIVE, ok("active\n"));
}
