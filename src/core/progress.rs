//! Compilation progress reporting.

use std::io::Write;

/// Receives `(done, total)` once per processed frame
pub trait ProgressSink {
    fn on_progress(&mut self, done: usize, total: usize);

    /// Called once after the last frame
    fn on_complete(&mut self) {}
}

impl<F: FnMut(usize, usize)> ProgressSink for F {
    fn on_progress(&mut self, done: usize, total: usize) {
        self(done, total)
    }
}

/// Discards progress
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&mut self, _done: usize, _total: usize) {}
}

/// Terminal progress bar: `Progress: |█████-----| 50.0% Complete`
pub struct TextProgressBar<W: Write> {
    out: W,
    prefix: String,
    suffix: String,
    length: usize,
    fill: char,
}

impl TextProgressBar<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write> TextProgressBar<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            prefix: "Progress:".into(),
            suffix: "Complete".into(),
            length: 50,
            fill: '█',
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length.max(1);
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Render the bar line (without the leading carriage return)
    pub fn render(&self, done: usize, total: usize) -> String {
        let ratio = if total == 0 { 1.0 } else { done as f64 / total as f64 };
        let filled = if total == 0 { self.length } else { self.length * done / total };
        let filled = filled.min(self.length);
        let bar: String = std::iter::repeat(self.fill)
            .take(filled)
            .chain(std::iter::repeat('-').take(self.length - filled))
            .collect();
        format!("{} |{}| {:.1}% {}", self.prefix, bar, ratio * 100.0, self.suffix)
    }
}

impl<W: Write> ProgressSink for TextProgressBar<W> {
    fn on_progress(&mut self, done: usize, total: usize) {
        let line = self.render(done, total);
        // Progress output is best-effort
        let _ = write!(self.out, "\r{line}");
        let _ = self.out.flush();
    }

    fn on_complete(&mut self) {
        let _ = writeln!(self.out);
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_bar() {
        let bar = TextProgressBar::new(Vec::new()).with_length(10);
        assert_eq!(bar.render(0, 4), "Progress: |----------| 0.0% Complete");
        assert_eq!(bar.render(2, 4), "Progress: |█████-----| 50.0% Complete");
        assert_eq!(bar.render(4, 4), "Progress: |██████████| 100.0% Complete");
    }

    #[test]
    fn test_bar_writes_each_update_and_newline() {
        let mut bar = TextProgressBar::new(Vec::new()).with_length(4);
        bar.on_progress(1, 2);
        bar.on_progress(2, 2);
        bar.on_complete();
        let text = String::from_utf8(bar.into_inner()).unwrap();
        assert_eq!(text.matches('\r').count(), 2);
        assert!(text.ends_with("100.0% Complete\n"));
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |done: usize, total: usize| seen.push((done, total));
            sink.on_progress(1, 3);
            sink.on_complete();
        }
        assert_eq!(seen, vec![(1, 3)]);
    }
}
