//! Collecting and reporting events of the building process.

use std::io::Write;

/// Trait for collecting (and summarizing or reporting) events during
/// construction of a function or a minimal perfect hash function.
pub trait BuildStatsCollector {
    /// Called once per solved bucket with its key and vertex counts and the
    /// retry sub-seed that succeeded.
    #[inline(always)] fn bucket(&mut self, _keys: usize, _vertices: usize, _attempt: u32) {}

    /// Called when the whole build restarts with a fresh master seed.
    #[inline(always)] fn global_retry(&mut self, _master_attempt: u32) {}

    /// Called once at the end of a successful build.
    #[inline(always)] fn end(&mut self) {}
}

/// Ignores all events and does nothing.
impl BuildStatsCollector for () {}

/// Reports build events to the wrapped writer, one line per event.
pub struct BuildStatsPrinter<W: Write = std::io::Stdout>(W);

impl BuildStatsPrinter<std::io::Stdout> {
    /// Reports build events to the standard output.
    pub fn stdout() -> Self { Self(std::io::stdout()) }
}

impl<W: Write> BuildStatsCollector for BuildStatsPrinter<W> {
    fn bucket(&mut self, keys: usize, vertices: usize, attempt: u32) {
        writeln!(self.0, "bucket: {keys} keys, {vertices} vertices, attempt {attempt}").unwrap();
    }
    fn global_retry(&mut self, master_attempt: u32) {
        writeln!(self.0, "global retry {master_attempt}").unwrap();
    }
    fn end(&mut self) {
        writeln!(self.0, "done").unwrap();
    }
}
