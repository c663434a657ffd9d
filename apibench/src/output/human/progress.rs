use std::collections::HashMap;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// What a bar measures: completed iterations or elapsed milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BarPosition {
    pub done: u64,
    pub total: u64,
}

pub(crate) struct HumanProgress {
    inner: Mutex<Inner>,
}

impl HumanProgress {
    pub(crate) fn new() -> Self {
        let multi = MultiProgress::new();
        multi.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));

        Self {
            inner: Mutex::new(Inner {
                multi,
                bars: HashMap::new(),
            }),
        }
    }

    pub(crate) fn update(&self, label: &str, position: BarPosition, message: String) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let pb = inner.get_or_create_bar(label);
        pb.set_message(message);
        pb.set_length(position.total);
        pb.set_position(position.done.min(position.total));
    }

    pub(crate) fn finish(&self) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for (_, pb) in inner.bars.drain() {
            pb.finish_and_clear();
        }

        let _ = inner.multi.clear();
    }
}

struct Inner {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl Inner {
    fn get_or_create_bar(&mut self, label: &str) -> &ProgressBar {
        self.bars.entry(label.to_string()).or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new(0));
            pb.set_style(bar_style());
            pb.set_prefix(label.to_string());
            pb
        })
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [ {bar:20.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}
