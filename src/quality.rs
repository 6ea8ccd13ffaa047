use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::StreamResult;

/// Assumed size when a quality label carries no usable number.
pub const DEFAULT_QUALITY: u32 = 720;

/// One selectable stream variant with a numeric quality score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityCandidate {
    pub url: String,
    pub headers: Option<HashMap<String, String>>,
    pub label: String,
    pub quality: u32,
}

/// First run of digits in a label: "1080p" → 1080, "HD 720" → 720. Falls back
/// to [`DEFAULT_QUALITY`] when no digits are present.
pub fn parse_quality_label(label: &str) -> u32 {
    let digits: String = label
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(DEFAULT_QUALITY)
}

/// Derive quality candidates from a stream result's source list. Bare stream
/// URLs carry no labels and are not ranked here.
pub fn candidates_from(result: &StreamResult) -> Vec<QualityCandidate> {
    let Some(sources) = &result.sources else {
        return Vec::new();
    };
    sources
        .iter()
        .map(|s| {
            let label = s
                .quality
                .clone()
                .or_else(|| s.label.clone())
                .unwrap_or_default();
            QualityCandidate {
                url: s.url.clone(),
                headers: s.headers.clone(),
                quality: parse_quality_label(&label),
                label,
            }
        })
        .collect()
}

/// Sort descending by numeric quality; stable, so equal scores keep source
/// order.
pub fn sort_streams_by_quality(candidates: &mut [QualityCandidate]) {
    candidates.sort_by(|a, b| b.quality.cmp(&a.quality));
}

pub fn select_best_quality(candidates: &[QualityCandidate]) -> Option<&QualityCandidate> {
    // First among equals, matching the head of the descending sort.
    candidates.iter().min_by_key(|c| std::cmp::Reverse(c.quality))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    Unknown,
}

impl Default for ConnectionType {
    fn default() -> Self {
        ConnectionType::Unknown
    }
}

/// Network signals sampled by the playback layer. Fields are optional because
/// not every platform exposes them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkConditions {
    pub connection: ConnectionType,
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<f64>,
}

/// Tunables for initial selection and the adaptive loop.
#[derive(Debug, Clone)]
pub struct QualityPolicy {
    pub wifi_target: u32,
    pub cellular_target: u32,
    pub ethernet_target: u32,
    /// Step down below this many seconds of buffered media.
    pub low_water_secs: f64,
    /// Consider stepping up above this many seconds.
    pub high_water_secs: f64,
    /// Coalesce changes within this window to avoid oscillation.
    pub debounce: Duration,
    /// Fraction of the downlink estimate treated as usable.
    pub bandwidth_margin: f64,
    /// Above this RTT the usable bandwidth estimate is halved.
    pub high_rtt_ms: f64,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            wifi_target: 1080,
            cellular_target: 480,
            ethernet_target: 2160,
            low_water_secs: 10.0,
            high_water_secs: 30.0,
            debounce: Duration::from_millis(1000),
            bandwidth_margin: 0.8,
            high_rtt_ms: 300.0,
        }
    }
}

/// Approximate bitrate a tier needs, in Mbps.
pub fn required_bitrate_mbps(quality: u32) -> f64 {
    match quality {
        q if q >= 2160 => 25.0,
        q if q >= 1440 => 16.0,
        q if q >= 1080 => 8.0,
        q if q >= 720 => 5.0,
        q if q >= 480 => 2.5,
        q if q >= 360 => 1.5,
        _ => 1.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    BufferLow,
    BandwidthHeadroom,
}

/// An adaptive step between tiers, reported so the playback layer can swap
/// sources.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityChange {
    pub from: u32,
    pub to: u32,
    pub url: String,
    pub reason: ChangeReason,
}

/// Picks a playback quality from a stream result and adjusts it from buffer
/// and network signals. One instance per playback session.
pub struct QualitySelector {
    candidates: Vec<QualityCandidate>,
    current: usize,
    policy: QualityPolicy,
    auto_enabled: bool,
    last_change: Option<Instant>,
}

impl QualitySelector {
    /// `None` when the result carries no ranked sources.
    pub fn new(result: &StreamResult, policy: QualityPolicy) -> Option<Self> {
        let mut candidates = candidates_from(result);
        if candidates.is_empty() {
            return None;
        }
        sort_streams_by_quality(&mut candidates);
        Some(Self {
            candidates,
            current: 0,
            policy,
            auto_enabled: true,
            last_change: None,
        })
    }

    pub fn candidates(&self) -> &[QualityCandidate] {
        &self.candidates
    }

    pub fn current(&self) -> &QualityCandidate {
        &self.candidates[self.current]
    }

    pub fn is_auto(&self) -> bool {
        self.auto_enabled
    }

    fn target_for(&self, connection: ConnectionType) -> u32 {
        match connection {
            ConnectionType::Wifi => self.policy.wifi_target,
            ConnectionType::Cellular => self.policy.cellular_target,
            ConnectionType::Ethernet => self.policy.ethernet_target,
            ConnectionType::Unknown => self.policy.wifi_target,
        }
    }

    /// Choose the starting tier for the current connection: exact target
    /// match preferred, else the closest quality below it, else the lowest
    /// available.
    pub fn initial_select(&mut self, network: &NetworkConditions) -> &QualityCandidate {
        let target = self.target_for(network.connection);
        let pick = self
            .candidates
            .iter()
            .position(|c| c.quality == target)
            .or_else(|| self.candidates.iter().position(|c| c.quality <= target))
            .unwrap_or(self.candidates.len() - 1);
        self.current = pick;
        debug!(desired = target, quality = self.candidates[pick].quality, "initial quality selection");
        self.current()
    }

    /// Pin a tier manually. Disables the adaptive loop until
    /// [`QualitySelector::resume_auto`].
    pub fn set_manual(&mut self, index: usize) -> Option<&QualityCandidate> {
        if index >= self.candidates.len() {
            return None;
        }
        self.current = index;
        self.auto_enabled = false;
        Some(self.current())
    }

    pub fn resume_auto(&mut self) {
        self.auto_enabled = true;
    }

    /// Periodic health check. Returns a step when the buffer or bandwidth
    /// situation warrants one; changes within the debounce window coalesce
    /// into nothing.
    pub fn evaluate(
        &mut self,
        buffer_ahead_secs: f64,
        network: &NetworkConditions,
    ) -> Option<QualityChange> {
        if !self.auto_enabled {
            return None;
        }
        if let Some(at) = self.last_change {
            if at.elapsed() < self.policy.debounce {
                return None;
            }
        }

        if buffer_ahead_secs < self.policy.low_water_secs && self.current + 1 < self.candidates.len()
        {
            return Some(self.step_to(self.current + 1, ChangeReason::BufferLow));
        }

        if buffer_ahead_secs > self.policy.high_water_secs && self.current > 0 {
            let next = &self.candidates[self.current - 1];
            if self.supports(next.quality, network) {
                return Some(self.step_to(self.current - 1, ChangeReason::BandwidthHeadroom));
            }
        }

        None
    }

    fn supports(&self, quality: u32, network: &NetworkConditions) -> bool {
        let Some(downlink) = network.downlink_mbps else {
            // No estimate: never step up blindly.
            return false;
        };
        let mut usable = downlink * self.policy.bandwidth_margin;
        if network.rtt_ms.map(|r| r > self.policy.high_rtt_ms).unwrap_or(false) {
            usable /= 2.0;
        }
        required_bitrate_mbps(quality) <= usable
    }

    fn step_to(&mut self, index: usize, reason: ChangeReason) -> QualityChange {
        let from = self.candidates[self.current].quality;
        self.current = index;
        self.last_change = Some(Instant::now());
        let to = &self.candidates[index];
        debug!(from, to = to.quality, ?reason, "quality step");
        QualityChange {
            from,
            to: to.quality,
            url: to.url.clone(),
            reason,
        }
    }
}
