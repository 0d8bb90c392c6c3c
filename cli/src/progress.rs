use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use colored::*;
use credstorm_core::{AttackEventSink, Attempt, ProgressKind, SinkRef};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// The run's progress bar, hidden until `ProgressSink::new_ref` shows it.
pub fn new_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden());
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar
}

/// Log target that clears the bar while a record is written so the two
/// never share a line.
pub struct BarWriter<W> {
    bar: ProgressBar,
    inner: W,
}

impl<W: Write> BarWriter<W> {
    pub fn new(bar: ProgressBar, inner: W) -> Self {
        Self { bar, inner }
    }
}

impl<W: Write> Write for BarWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let inner = &mut self.inner;
        self.bar.suspend(|| inner.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Terminal sink: one progress bar over the pending pairs, with messages
/// printed above it.
pub struct ProgressSink {
    bar: ProgressBar,
    attempted: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    abandoned: AtomicU64,
    mirror_to_log: bool,
}

impl ProgressSink {
    /// Sizes `bar` to `total` pairs and draws it on stderr. With
    /// `mirror_to_log`, every message is also handed to the logger so the log
    /// file has the full record.
    pub fn new_ref(bar: ProgressBar, total: usize, mirror_to_log: bool) -> SinkRef {
        bar.set_length(total as u64);
        bar.set_draw_target(ProgressDrawTarget::stderr());

        Arc::new(Self {
            bar,
            attempted: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            mirror_to_log,
        })
    }

    fn refresh(&self) {
        let attempted = self.attempted.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let retries = self.retries.load(Ordering::Relaxed);

        // every error is either retried or settles its pair
        self.bar.set_position((attempted + errors).saturating_sub(retries));
        self.bar.set_message(format!(
            "errors: {} retries: {} abandoned: {}",
            errors,
            retries,
            self.abandoned.load(Ordering::Relaxed)
        ));
    }
}

impl AttackEventSink for ProgressSink {
    fn on_log(&self, level: &str, message: &str) {
        let colored = match level {
            "error" => message.red().to_string(),
            "warn" => message.yellow().to_string(),
            _ => message.to_string(),
        };
        self.bar.println(colored);

        if self.mirror_to_log {
            match level {
                "error" => log::error!("{}", message),
                "warn" => log::warn!("{}", message),
                _ => log::info!("{}", message),
            }
        }
    }

    fn on_found(&self, attempt: &Attempt, status_code: u16) {
        self.bar.println(format!(
            "{} [{}] Valid username:password -> {}",
            "[+]".green().bold(),
            status_code,
            attempt.to_string().bright_yellow().bold()
        ));
        if self.mirror_to_log {
            log::info!("[{}] Valid username:password -> {}", status_code, attempt);
        }
    }

    fn on_progress(&self, kind: ProgressKind) {
        let counter = match kind {
            ProgressKind::Attempted => &self.attempted,
            ProgressKind::Error => &self.errors,
            ProgressKind::Retry => &self.retries,
            ProgressKind::Abandoned => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.refresh();
    }
}

impl Drop for ProgressSink {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}
