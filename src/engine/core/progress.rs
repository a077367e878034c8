//! Translation of engine output lines into typed events.
//!
//! ffmpeg speaks two dialects while encoding: `-progress` blocks on stdout
//! (`out_time_us=...`, `speed=...`, `progress=continue|end`) and classic
//! stats lines on stderr (`frame= 12 ... time=00:00:01.20 ... speed=1.5x`).
//! Both are understood here and nowhere else.

use regex::Regex;
use std::io::{BufRead, Lines};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Media time written so far
    Progress { elapsed_s: f64 },
    /// Encoding speed relative to realtime
    Speed(f64),
    /// `progress=end`
    Finished,
    /// Engine diagnostic worth keeping (errors, warnings, codec messages)
    Warning(String),
    Unrecognized,
}

fn stats_time_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").ok())
        .as_ref()
}

/// Parse `HH:MM:SS[.frac]` into seconds
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let mut parts = s.trim().splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse a single line of engine output
pub fn parse_line(line: &str) -> EngineEvent {
    let line = line.trim();
    if line.is_empty() {
        return EngineEvent::Unrecognized;
    }

    if let Some((key, value)) = line.split_once('=') {
        let value = value.trim();
        match key.trim() {
            // out_time_ms is microseconds as well (long-standing ffmpeg quirk)
            "out_time_us" | "out_time_ms" => {
                return value
                    .parse::<u64>()
                    .map(|us| EngineEvent::Progress {
                        elapsed_s: us as f64 / 1_000_000.0,
                    })
                    .unwrap_or(EngineEvent::Unrecognized);
            }
            "out_time" => {
                return parse_timestamp(value)
                    .map(|elapsed_s| EngineEvent::Progress { elapsed_s })
                    .unwrap_or(EngineEvent::Unrecognized);
            }
            "speed" => {
                return value
                    .trim_end_matches('x')
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|s| s.is_finite())
                    .map(EngineEvent::Speed)
                    .unwrap_or(EngineEvent::Unrecognized);
            }
            "progress" => {
                return if value == "end" {
                    EngineEvent::Finished
                } else {
                    EngineEvent::Unrecognized
                };
            }
            _ => {}
        }
    }

    if let Some(caps) = stats_time_regex().and_then(|re| re.captures(line)) {
        let stamp = format!("{}:{}:{}", &caps[1], &caps[2], &caps[3]);
        if let Some(elapsed_s) = parse_timestamp(&stamp) {
            return EngineEvent::Progress { elapsed_s };
        }
    }

    let lower = line.to_ascii_lowercase();
    if lower.contains("error")
        || lower.contains("warning")
        || (line.starts_with('[') && line.contains(" @ 0x"))
    {
        return EngineEvent::Warning(line.to_string());
    }

    EngineEvent::Unrecognized
}

/// Lazy event stream over a line-oriented reader. Stops at the first read
/// error (a closed pipe ends the stream the same way EOF does).
pub struct EngineEvents<R> {
    lines: Lines<R>,
}

impl<R: BufRead> Iterator for EngineEvents<R> {
    type Item = EngineEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.lines.next()?.ok()?;
        Some(parse_line(&line))
    }
}

pub fn engine_events<R: BufRead>(reader: R) -> EngineEvents<R> {
    EngineEvents {
        lines: reader.lines(),
    }
}

/// Maps elapsed media time onto a 0..=100 percentage that never goes
/// backwards within one attempt.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_s: f64,
    percent: f64,
    speed: Option<f64>,
}

impl ProgressTracker {
    pub fn new(total_s: f64) -> Self {
        Self {
            total_s,
            percent: 0.0,
            speed: None,
        }
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    pub fn speed(&self) -> Option<f64> {
        self.speed
    }

    /// Feed one event. Returns the new percentage when it moved forward.
    pub fn observe(&mut self, event: &EngineEvent) -> Option<f64> {
        let candidate = match event {
            EngineEvent::Progress { elapsed_s } => {
                if self.total_s > 0.0 && elapsed_s.is_finite() {
                    (elapsed_s / self.total_s * 100.0).clamp(0.0, 100.0)
                } else {
                    return None;
                }
            }
            EngineEvent::Finished => 100.0,
            EngineEvent::Speed(speed) => {
                self.speed = Some(*speed);
                return None;
            }
            EngineEvent::Warning(_) | EngineEvent::Unrecognized => return None,
        };

        if candidate > self.percent {
            self.percent = candidate;
            Some(candidate)
        } else {
            None
        }
    }
}
