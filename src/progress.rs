use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt;
use std::io::{self, Write};
use tracing_subscriber::fmt::MakeWriter;

const JOB_TEMPLATE: &str = "{prefix:>12.bold} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}";
const PAGE_TEMPLATE: &str = "{prefix:>12.dim} [{bar:30.green/white}] {pos}/{len} {wide_msg}";

/// Terminal progress bars, or nothing at all when disabled.
#[derive(Clone)]
pub struct ProgressReporter {
    multi: MultiProgress,
    enabled: bool,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ProgressReporter {
    pub fn new(enabled: bool) -> Self {
        let multi = MultiProgress::new();
        if !enabled {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { multi, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn jobs(&self, len: usize) -> ProgressBar {
        self.bar(len, JOB_TEMPLATE, "jobs")
    }

    /// Length is unknown until the at-home server lists the pages.
    pub fn pages(&self, name: &str) -> ProgressBar {
        let bar = self.bar(0, PAGE_TEMPLATE, "pages");
        bar.set_message(name.to_string());
        bar
    }

    fn bar(&self, len: usize, template: &str, prefix: &'static str) -> ProgressBar {
        if !self.enabled {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        self.multi
            .add(ProgressBar::new(len as u64).with_style(style).with_prefix(prefix))
    }
}

/// Writes log lines to stderr with the bars cleared, so they do not end up
/// drawn over each other.
#[derive(Clone)]
pub struct LogWriter {
    multi: MultiProgress,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi.suspend(|| io::stderr().write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressReporter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            multi: self.multi.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_disabled_bars_are_hidden() {
        let reporter = ProgressReporter::new(false);
        assert!(!reporter.is_enabled());
        let bar = reporter.pages("Ch. 1");
        bar.set_length(3);
        bar.inc(2);
        assert!(bar.is_hidden());
        assert_eq!(bar.position(), 2);
    }

    #[test]
    fn test_log_writer_keeps_whole_lines() {
        let reporter = ProgressReporter::new(false);
        let bar = reporter.jobs(2);
        let mut writer = reporter.make_writer();
        assert_eq!(writer.write(b"INFO downloading\n").unwrap(), 17);
        writer.flush().unwrap();
        bar.inc(1);
        assert_eq!(bar.position(), 1);
    }
}
