//! Line-oriented status output.
//!
//! The orchestrator and reporter never print directly. They hand finished
//! lines to a [`StatusSink`], so the binary can route them through `tracing`
//! while tests capture them in memory.

use parking_lot::Mutex;
use tracing::info;

/// Destination for human-readable status lines
pub trait StatusSink: Send + Sync {
    fn write(&self, line: &str);
}

/// Emits every line as an `info!` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn write(&self, line: &str) {
        info!("{}", line);
    }
}

/// Collects lines in memory
#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every line written so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Whether any line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }
}

impl StatusSink for MemoryStatusSink {
    fn write(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemoryStatusSink::new();
        sink.write("first");
        sink.write("second");
        assert_eq!(sink.lines(), vec!["first", "second"]);
        assert!(sink.contains("sec"));
        assert!(!sink.contains("third"));
    }

    #[test]
    fn test_sinks_are_object_safe() {
        let sinks: Vec<Box<dyn StatusSink>> =
            vec![Box::new(TracingStatusSink), Box::new(MemoryStatusSink::new())];
        for sink in &sinks {
            sink.write("line");
        }
    }
}
