//! Degenerate-output detection for streamed replies.
//!
//! Some models fall into a loop of emitting the same closing tag over and
//! over (`</answer></answer></answer>...`). The guard keeps a bounded tail of
//! the reply and reports where to cut once such a run gets long enough.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::settings::{DEFAULT_STREAM_GUARD_TAG_THRESHOLD, DEFAULT_STREAM_GUARD_WINDOW};

fn closing_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"</\s*([A-Za-z_][A-Za-z0-9_.:-]*)\s*>").expect("valid closing tag regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamGuardConfig {
    pub enabled: bool,
    /// Trailing window size in characters.
    pub window_size: usize,
    pub tag_repetition_threshold: usize,
}

impl Default for StreamGuardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_size: DEFAULT_STREAM_GUARD_WINDOW,
            tag_repetition_threshold: DEFAULT_STREAM_GUARD_TAG_THRESHOLD,
        }
    }
}

impl StreamGuardConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn window_size(mut self, chars: usize) -> Self {
        self.window_size = chars;
        self
    }

    pub fn threshold(mut self, repetitions: usize) -> Self {
        self.tag_repetition_threshold = repetitions;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Continue,
    /// Keep the first `offset` bytes of the reply and discard the rest.
    Truncate { offset: usize },
}

#[derive(Debug)]
struct Run<'a> {
    tag: &'a str,
    first_end: usize,
    last_end: usize,
    count: usize,
}

/// Per-call guard state. Not shared between calls.
#[derive(Debug)]
pub struct StreamGuard {
    enabled: bool,
    window_size: usize,
    threshold: usize,
    window: String,
    window_chars: usize,
    /// Bytes of the reply that have scrolled out of the window.
    evicted_bytes: usize,
    truncated_at: Option<usize>,
}

impl StreamGuard {
    pub fn new(config: StreamGuardConfig) -> Self {
        Self {
            enabled: config.enabled,
            window_size: config.window_size.max(1),
            threshold: config.tag_repetition_threshold.max(1),
            window: String::new(),
            window_chars: 0,
            evicted_bytes: 0,
            truncated_at: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(StreamGuardConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn truncated_at(&self) -> Option<usize> {
        self.truncated_at
    }

    /// Feed the next fragment of the reply, in order.
    pub fn observe(&mut self, fragment: &str) -> GuardDecision {
        if !self.enabled {
            return GuardDecision::Continue;
        }
        if let Some(offset) = self.truncated_at {
            return GuardDecision::Truncate { offset };
        }

        self.window.push_str(fragment);
        self.window_chars += fragment.chars().count();
        self.evict();

        match self.find_run() {
            Some(end) => {
                let offset = self.evicted_bytes + end;
                tracing::warn!(
                    offset,
                    threshold = self.threshold,
                    "repeated closing tag detected, truncating reply"
                );
                self.truncated_at = Some(offset);
                GuardDecision::Truncate { offset }
            }
            None => GuardDecision::Continue,
        }
    }

    fn evict(&mut self) {
        if self.window_chars <= self.window_size {
            return;
        }
        let excess = self.window_chars - self.window_size;
        let cut = self
            .window
            .char_indices()
            .nth(excess)
            .map(|(i, _)| i)
            .unwrap_or(self.window.len());
        self.window.drain(..cut);
        self.evicted_bytes += cut;
        self.window_chars = self.window_size;
    }

    /// End (window-relative) of the first tag in the earliest run that
    /// reaches the threshold.
    fn find_run(&self) -> Option<usize> {
        let mut run: Option<Run<'_>> = None;

        for caps in closing_tag_regex().captures_iter(&self.window) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let tag = name.as_str();

            let extends = run.as_ref().is_some_and(|r| {
                r.tag == tag && self.window[r.last_end..whole.start()].trim().is_empty()
            });
            match run.as_mut() {
                Some(r) if extends => {
                    r.count += 1;
                    r.last_end = whole.end();
                }
                _ => {
                    run = Some(Run {
                        tag,
                        first_end: whole.end(),
                        last_end: whole.end(),
                        count: 1,
                    })
                }
            }

            if let Some(r) = &run
                && r.count >= self.threshold
            {
                return Some(r.first_end);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(threshold: usize) -> StreamGuard {
        StreamGuard::new(StreamGuardConfig::enabled().threshold(threshold))
    }

    #[test]
    fn test_threshold_boundary() {
        let body = "<answer>42";
        let tags = |n: usize| "</answer>".repeat(n);

        let mut below = guard(5);
        assert_eq!(
            below.observe(&format!("{body}{}", tags(4))),
            GuardDecision::Continue
        );

        let mut at = guard(5);
        assert_eq!(
            at.observe(&format!("{body}{}", tags(5))),
            GuardDecision::Truncate {
                offset: body.len() + "</answer>".len()
            }
        );
    }

    #[test]
    fn test_whitespace_between_tags_counts() {
        let mut guard = guard(3);
        assert_eq!(guard.observe("done</x>\n</x>  "), GuardDecision::Continue);
        assert_eq!(
            guard.observe("\t</x>"),
            GuardDecision::Truncate {
                offset: "done</x>".len()
            }
        );
    }

    #[test]
    fn test_text_between_tags_breaks_run() {
        let mut guard = guard(3);
        let decision = guard.observe("</p>a</p>b</p>c</p>");
        assert_eq!(decision, GuardDecision::Continue);
    }

    #[test]
    fn test_different_tags_break_run() {
        let mut guard = guard(3);
        assert_eq!(guard.observe("</a></b></a></b></a>"), GuardDecision::Continue);
    }

    #[test]
    fn test_tag_split_across_fragments() {
        let mut guard = guard(2);
        assert_eq!(guard.observe("ok</ans"), GuardDecision::Continue);
        assert_eq!(guard.observe("wer></answ"), GuardDecision::Continue);
        assert_eq!(
            guard.observe("er>"),
            GuardDecision::Truncate {
                offset: "ok</answer>".len()
            }
        );
    }

    #[test]
    fn test_truncation_is_sticky() {
        let mut guard = guard(2);
        let first = guard.observe("x</t></t>");
        assert!(matches!(first, GuardDecision::Truncate { .. }));
        assert_eq!(guard.observe("more text"), first);
        assert_eq!(guard.truncated_at(), Some(5));
    }

    #[test]
    fn test_disabled_guard_never_truncates() {
        let mut guard = StreamGuard::disabled();
        assert_eq!(guard.observe(&"</x>".repeat(1000)), GuardDecision::Continue);
        assert!(guard.window.is_empty());
    }

    #[test]
    fn test_offset_is_absolute_after_eviction() {
        let mut guard = StreamGuard::new(
            StreamGuardConfig::enabled().window_size(32).threshold(3),
        );
        let prefix = "é".repeat(100);
        assert_eq!(guard.observe(&prefix), GuardDecision::Continue);
        assert_eq!(
            guard.observe("</z></z></z>"),
            GuardDecision::Truncate {
                offset: prefix.len() + "</z>".len()
            }
        );
    }

    #[test]
    fn test_truncation_keeps_prefix_non_empty() {
        let mut guard = guard(1);
        match guard.observe("</only>") {
            GuardDecision::Truncate { offset } => assert!(offset > 0),
            GuardDecision::Continue => panic!("expected truncation"),
        }
    }
}
