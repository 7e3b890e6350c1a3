//! Process-level state of the map server: run flag, uptime, signals and
//! the console command queue fed by the stdin reader thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// Called once when the simulation loop exits.
pub type TermFunc = Box<dyn Fn() + Send + 'static>;

pub struct ServerState {
    pub shutdown_requested: bool,
    pub term_func: Option<TermFunc>,
    started: DateTime<Utc>,
}

impl ServerState {
    pub fn new() -> Self {
        ServerState {
            shutdown_requested: false,
            term_func: None,
            started: Utc::now(),
        }
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_requested
    }

    /// Set the termination callback function
    pub fn set_term_func<F>(&mut self, func: F)
    where
        F: Fn() + Send + 'static,
    {
        self.term_func = Some(Box::new(func));
    }

    /// Call the termination function if set
    pub fn call_term_func(&self) {
        if let Some(ref func) = self.term_func {
            func();
        }
    }

    /// Whole seconds since the server state was created.
    pub fn uptime(&self) -> i64 {
        (Utc::now() - self.started).num_seconds().max(0)
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Format an uptime in seconds as `Xd Xh Xm Xs`.
pub fn format_uptime(secs: i64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{days}d {hours}h {minutes}m {seconds}s")
}

/// Process signals the map server listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGHUP; logged, the world keeps running.
    Hangup,
}

impl Signal {
    /// Check if this signal should trigger shutdown
    pub fn should_shutdown(&self) -> bool {
        matches!(self, Signal::Interrupt | Signal::Terminate)
    }
}

// ============================================
// Console input queue
// ============================================

/// Commands understood by the map server console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Status,
    Shutdown,
    Unknown(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let word = line.trim();
        if word.is_empty() {
            return None;
        }
        Some(match word.to_ascii_lowercase().as_str() {
            "status" => ConsoleCommand::Status,
            "shutdown" | "exit" | "quit" => ConsoleCommand::Shutdown,
            _ => ConsoleCommand::Unknown(word.to_string()),
        })
    }
}

/// Lock-protected line queue filled by the console reader thread.
///
/// The simulation loop drains it between pumps and sleeps on
/// [`ConsoleQueue::notified`] so a pushed line cuts the sleep short.
#[derive(Default)]
pub struct ConsoleQueue {
    lines: Mutex<VecDeque<String>>,
    wake: tokio::sync::Notify,
}

impl ConsoleQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push_back(line);
        }
        self.wake.notify_one();
    }

    /// Resolves once a line has been pushed since the last wake-up.
    pub async fn notified(&self) {
        self.wake.notified().await;
    }

    /// Take every queued line without blocking.
    pub fn drain(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(mut lines) => lines.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawn the background thread that feeds stdin lines into `queue`.
pub fn spawn_console_reader(queue: Arc<ConsoleQueue>) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new().name("console".into()).spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => queue.push(line.trim_end().to_string()),
                Err(e) => {
                    tracing::warn!("[console] read error: {e}");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_state_creation() {
        let state = ServerState::new();
        assert!(!state.should_shutdown());
        assert!(state.term_func.is_none());
        assert!(state.uptime() >= 0);
    }

    #[test]
    fn test_server_state_shutdown() {
        let mut state = ServerState::new();
        assert!(!state.should_shutdown());

        state.request_shutdown();
        assert!(state.should_shutdown());
    }

    #[test]
    fn test_term_func() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let mut state = ServerState::new();
        state.set_term_func(move || {
            called_clone.store(true, Ordering::SeqCst);
        });

        assert!(!called.load(Ordering::SeqCst));
        state.call_term_func();
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_signal_should_shutdown() {
        assert!(Signal::Interrupt.should_shutdown());
        assert!(Signal::Terminate.should_shutdown());
        assert!(!Signal::Hangup.should_shutdown());
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0d 0h 0m 0s");
        assert_eq!(format_uptime(90061), "1d 1h 1m 1s");
    }

    #[test]
    fn test_console_command_parse() {
        assert_eq!(ConsoleCommand::parse("  status \n"), Some(ConsoleCommand::Status));
        assert_eq!(ConsoleCommand::parse("SHUTDOWN"), Some(ConsoleCommand::Shutdown));
        assert_eq!(ConsoleCommand::parse(""), None);
        assert_eq!(ConsoleCommand::parse("warp"), Some(ConsoleCommand::Unknown("warp".into())));
    }

    #[tokio::test]
    async fn test_console_queue_wakes_waiter() {
        let queue = ConsoleQueue::new();
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            producer.push("status".into());
            producer.push("shutdown".into());
        });
        tokio::time::timeout(std::time::Duration::from_secs(5), queue.notified()).await.unwrap();
        handle.join().unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain(), vec!["status".to_string(), "shutdown".to_string()]);
        assert!(queue.is_empty());
    }
}
