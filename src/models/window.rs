/// Default warning threshold for context window utilization (80%)
pub const DEFAULT_WARNING_THRESHOLD: f64 = 0.80;

/// Default critical threshold for context window utilization (95%)
pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowStatus {
    Ok { utilization: f64, remaining: u64 },
    Warning { utilization: f64, remaining: u64 },
    Critical { utilization: f64, remaining: u64 },
    Exceeded { overage: u64 },
}

impl WindowStatus {
    pub fn should_proceed(&self) -> bool {
        !matches!(self, Self::Exceeded { .. })
    }

    pub fn utilization(&self) -> Option<f64> {
        match self {
            Self::Ok { utilization, .. }
            | Self::Warning { utilization, .. }
            | Self::Critical { utilization, .. } => Some(*utilization),
            Self::Exceeded { .. } => None,
        }
    }
}

/// Prompt size measured against a model's context window.
#[derive(Debug, Clone, Copy)]
pub struct ContextUsage {
    limit: u64,
    prompt_tokens: u64,
    warning_threshold: f64,
    critical_threshold: f64,
}

impl ContextUsage {
    pub fn new(limit: u64, prompt_tokens: u64) -> Self {
        Self {
            limit,
            prompt_tokens,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
        }
    }

    pub fn thresholds(mut self, warning: f64, critical: f64) -> Self {
        self.warning_threshold = warning;
        self.critical_threshold = critical;
        self
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.prompt_tokens)
    }

    pub fn utilization(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        self.prompt_tokens as f64 / self.limit as f64
    }

    /// Whole percent of the window still free, truncated toward zero and
    /// clamped to `0..=100`. `None` for a zero-sized window.
    pub fn left_percent(&self) -> Option<u8> {
        if self.limit == 0 {
            return None;
        }
        let left = (100.0 * (1.0 - self.utilization())).trunc();
        Some(left.clamp(0.0, 100.0) as u8)
    }

    pub fn status(&self) -> WindowStatus {
        let utilization = self.utilization();

        if self.prompt_tokens > self.limit {
            WindowStatus::Exceeded {
                overage: self.prompt_tokens - self.limit,
            }
        } else if utilization >= self.critical_threshold {
            WindowStatus::Critical {
                utilization,
                remaining: self.remaining(),
            }
        } else if utilization >= self.warning_threshold {
            WindowStatus::Warning {
                utilization,
                remaining: self.remaining(),
            }
        } else {
            WindowStatus::Ok {
                utilization,
                remaining: self.remaining(),
            }
        }
    }

    pub fn can_fit(&self, additional: u64) -> bool {
        self.prompt_tokens.saturating_add(additional) <= self.limit
    }
}
