//! 📊 progress.rs -- "Is the rebuild done yet?" -- every operator, every rebuild, forever.
//!
//! Copying a big index into its successor can take a while. This puts a bar on stderr
//! that counts documents against the total the source reported before the copy began.
//! When stderr is not a terminal indicatif keeps quiet on its own.
//!
//! ⚠️ Watching this progress bar will not make it go faster. We've tried. Science says no.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

/// 🔢 "1000000" -> "1,000,000". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut result = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS if you should probably call your mom.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 📊 Document counter for one `source -> target` copy.
pub(crate) struct CopyProgress {
    label: String,
    total_docs: u64,
    copied_docs: u64,
    progress_bar: ProgressBar,
    start_time: Instant,
}

// -- 🎭 ProgressBar is a diva and doesn't derive Debug
impl std::fmt::Debug for CopyProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyProgress")
            .field("label", &self.label)
            .field("total_docs", &self.total_docs)
            .field("copied_docs", &self.copied_docs)
            .finish()
    }
}

impl CopyProgress {
    /// 🚀 `total_docs` of 0 means "no idea", and the bar just counts up.
    pub(crate) fn new(label: String, total_docs: u64) -> Self {
        let progress_bar = ProgressBar::new(total_docs);
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}] {pos}/{len}")
            // -- 🐛 the template is a literal; if it ever stops parsing we fall back to plain
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        progress_bar.set_style(style);
        let progress = Self {
            label,
            total_docs,
            copied_docs: 0,
            progress_bar,
            start_time: Instant::now(),
        };
        progress.render();
        progress
    }

    /// 🔄 Count another page of documents.
    pub(crate) fn update(&mut self, docs: u64) {
        self.copied_docs += docs;
        self.progress_bar.set_position(self.copied_docs);
        self.render();
    }

    pub(crate) fn copied(&self) -> u64 {
        self.copied_docs
    }

    /// ✅ Ring the bell. We made it.
    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    fn render(&self) {
        let elapsed = self.start_time.elapsed();
        let per_sec = if elapsed.as_secs_f64() > 0.0 {
            (self.copied_docs as f64 / elapsed.as_secs_f64()) as u64
        } else {
            0
        };
        self.progress_bar.set_message(format!(
            "copy: {} | {} docs | {} docs/s | {} elapsed",
            self.label,
            format_number(self.copied_docs),
            format_number(per_sec),
            format_duration(elapsed)
        ));
    }
}
