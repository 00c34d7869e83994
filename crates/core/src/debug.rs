//! In-memory diagnostic log and the text served at the debug path.

use std::fmt::Display;
use std::sync::{Arc, Mutex};

use crate::adapter::Clock;

/// Entries per generation; at most two generations are retained.
pub const DEBUG_LOG_BUFFER_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEntry {
    pub time: i64,
    pub value: String,
    pub context: String,
}

#[derive(Debug, Default)]
struct Generations {
    current: Vec<DebugEntry>,
    previous: Vec<DebugEntry>,
}

/// Bounded log of errors hit while serving, rotated in two generations so
/// appends stay O(1) and memory stays flat.
pub struct DebugLog {
    clock: Arc<dyn Clock>,
    entries: Mutex<Generations>,
}

impl std::fmt::Debug for DebugLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugLog").field("len", &self.entries().len()).finish()
    }
}

impl DebugLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, entries: Mutex::new(Generations::default()) }
    }

    pub fn log(&self, value: impl Display, context: &str) {
        let entry = DebugEntry { time: self.clock.now_ms(), value: value.to_string(), context: context.to_string() };
        let mut gens = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if gens.current.len() == DEBUG_LOG_BUFFER_SIZE {
            gens.previous = std::mem::take(&mut gens.current);
        }
        gens.current.push(entry);
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> Vec<DebugEntry> {
        let gens = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        gens.previous.iter().chain(gens.current.iter()).cloned().collect()
    }

    /// Elapsed time since `time` as `1d2h3m4s5u`, or `never`.
    pub fn since(&self, time: Option<i64>) -> String {
        match time {
            None => "never".to_string(),
            Some(t) => format_elapsed(self.clock.now_ms() - t),
        }
    }

    fn format_entries(&self) -> String {
        self.entries()
            .iter()
            .map(|e| format!("[{}] {} {}", self.since(Some(e.time)), e.value, e.context))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Plain-text dump of the agent's state.
    pub fn render(&self, snapshot: &DebugSnapshot) -> String {
        let state = format!(
            "Outpost Debug Info:\n\nDriver state: {} ({})\nLatest manifest hash: {}\nLast update check: {}",
            snapshot.state,
            snapshot.why,
            snapshot.latest_hash.as_deref().unwrap_or("none"),
            self.since(snapshot.last_update_check),
        );

        let versions = snapshot
            .versions
            .iter()
            .map(|v| format!("=== Version {} ===\n\nClients: {}", v.hash, v.clients.join(", ")))
            .collect::<Vec<_>>()
            .join("\n\n");

        let tasks = snapshot
            .idle_tasks
            .iter()
            .map(|t| format!(" * {t}"))
            .collect::<Vec<_>>()
            .join("\n");

        let idle = format!(
            "=== Idle Task Queue ===\nLast update tick: {}\nLast update run: {}\nTask queue:\n{}\n\nDebug log:\n{}\n",
            self.since(snapshot.idle_last_trigger),
            self.since(snapshot.idle_last_run),
            tasks,
            self.format_entries(),
        );

        format!("{state}\n\n{versions}\n\n{idle}")
    }
}

fn format_elapsed(mut age: i64) -> String {
    let days = age / 86_400_000;
    age %= 86_400_000;
    let hours = age / 3_600_000;
    age %= 3_600_000;
    let minutes = age / 60_000;
    age %= 60_000;
    let seconds = age / 1000;
    let millis = age % 1000;

    let mut out = String::new();
    for (value, unit) in [(days, "d"), (hours, "h"), (minutes, "m"), (seconds, "s"), (millis, "u")] {
        if value > 0 {
            out.push_str(&format!("{value}{unit}"));
        }
    }
    out
}

/// Everything the debug page shows besides the log itself.
#[derive(Debug, Clone, Default)]
pub struct DebugSnapshot {
    pub state: String,
    pub why: String,
    pub latest_hash: Option<String>,
    pub last_update_check: Option<i64>,
    pub versions: Vec<DebugVersion>,
    pub idle_last_trigger: Option<i64>,
    pub idle_last_run: Option<i64>,
    pub idle_tasks: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DebugVersion {
    pub hash: String,
    pub clients: Vec<String>,
}
