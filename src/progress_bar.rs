pub use crate::traits::Progress;

use log::LevelFilter;

impl Progress for indicatif::ProgressBar {
    fn inc(&self, i: u64) {
        indicatif::ProgressBar::inc(self, i)
    }

    fn finish(&self) {
        indicatif::ProgressBar::finish_and_clear(self)
    }
}

impl Progress for logbar::ProgressBar {
    fn inc(&self, i: u64) {
        logbar::ProgressBar::inc(self, i as usize)
    }

    fn finish(&self) {
        logbar::ProgressBar::finish(self)
    }
}

/// Dummy progress indicator
pub struct NoProgress {}
impl Progress for NoProgress {
    fn inc(&self, _i: u64) {}

    fn finish(&self) {}
}

/// Don't show any progress indicator
pub const NO_PROGRESS: NoProgress = NoProgress {};

/// Progress bar shown while loading event files
///
/// An `indicatif` bar is used on interactive terminals and a `logbar`
/// otherwise. Nothing is shown unless the log level is exactly `info`.
/// Logging is suspended until [Progress::finish] is called.
pub struct ProgressBar {
    bar: Box<dyn Progress + Send + Sync>,
    suspended_level: Option<LevelFilter>,
}

impl Default for ProgressBar {
    fn default() -> Self {
        Self {
            bar: Box::new(NO_PROGRESS),
            suspended_level: None,
        }
    }
}

impl Progress for ProgressBar {
    fn inc(&self, i: u64) {
        self.bar.inc(i);
    }

    fn finish(&self) {
        self.bar.finish();
        if let Some(level) = self.suspended_level {
            log::set_max_level(level);
        }
    }
}

impl ProgressBar {
    /// A new progress bar with the given maximum progress and message
    pub fn new(len: u64, message: &str) -> Self {
        let level = log::max_level();
        if level != LevelFilter::Info || len == 0 {
            ProgressBar::default()
        } else if console::Term::stderr().features().is_attended() {
            ProgressBar::indicatif(len, message, level)
        } else {
            ProgressBar::logbar(len, message, level)
        }
    }

    fn indicatif(len: u64, message: &str, level: LevelFilter) -> Self {
        let bar = indicatif::ProgressBar::new(len);
        let style = indicatif::ProgressStyle::default_bar()
            .template("{bar:50.green/green} {msg} {pos}/{len} [{elapsed}]");
        if let Ok(style) = style {
            bar.set_style(style);
        }
        bar.set_message(message.to_owned());
        log::set_max_level(LevelFilter::Off);
        ProgressBar {
            bar: Box::new(bar),
            suspended_level: Some(level),
        }
    }

    fn logbar(len: u64, message: &str, level: LevelFilter) -> Self {
        let style = logbar::Style::new().indicator('█');
        eprintln!("{}", message);
        let bar = logbar::ProgressBar::with_style(len as usize, style);
        log::set_max_level(LevelFilter::Off);
        ProgressBar {
            bar: Box::new(bar),
            suspended_level: Some(level),
        }
    }
}
