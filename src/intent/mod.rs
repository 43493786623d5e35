//! Rule-based translation of operator free text into a [`QosProfile`].
//!
//! Deliberately not ML-backed: the audit story and offline reproducibility
//! are hard requirements, so classification is a plain keyword count.

use crate::error::{IntentError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SliceType {
    #[serde(rename = "eMBB")]
    Embb,
    #[serde(rename = "uRLLC")]
    Urllc,
    #[serde(rename = "mMTC")]
    Mmtc,
    Balanced,
}

impl std::fmt::Display for SliceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SliceType::Embb => "eMBB",
            SliceType::Urllc => "uRLLC",
            SliceType::Mmtc => "mMTC",
            SliceType::Balanced => "balanced",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QosProfile {
    pub bandwidth: f64,
    pub latency: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reliability: Option<f64>,
    pub slice_type: SliceType,
}

impl QosProfile {
    /// Validate against the declared schema bounds. Out-of-range
    /// values are rejected rather than clamped.
    pub fn validate(&self) -> Result<()> {
        if !(0.0 < self.bandwidth && self.bandwidth <= 5.0) {
            return Err(IntentError::SchemaViolation {
                reason: format!("bandwidth {} out of range (0, 5]", self.bandwidth),
            }
            .into());
        }
        if !(1.0..=20.0).contains(&self.latency) {
            return Err(IntentError::SchemaViolation {
                reason: format!("latency {} out of range [1, 20]", self.latency),
            }
            .into());
        }
        if let Some(r) = self.reliability {
            if !(0.0..=100.0).contains(&r) {
                return Err(IntentError::SchemaViolation {
                    reason: format!("reliability {r} out of range [0, 100]"),
                }
                .into());
            }
        }
        if let Some(p) = self.packet_loss {
            if !(0.0..=100.0).contains(&p) {
                return Err(IntentError::SchemaViolation {
                    reason: format!("packet_loss {p} out of range [0, 100]"),
                }
                .into());
            }
        }
        Ok(())
    }
}

const EMBB_KEYWORDS: &[&str] = &[
    "video", "streaming", "stream", "broadband", "download", "bandwidth", "4k", "hd",
];
const URLLC_KEYWORDS: &[&str] = &[
    "critical",
    "emergency",
    "mission",
    "industrial",
    "control",
    "ultra-low",
    "ultra low",
    "robotic",
    "surgery",
];
const BALANCED_KEYWORDS: &[&str] = &["balanced", "general", "default", "mixed"];
const MMTC_KEYWORDS: &[&str] = &["iot", "sensor", "telemetry", "massive", "meter"];

const RELIABILITY_KEYWORDS: &[&str] = &["critical", "emergency", "mission", "industrial"];
const PACKET_LOSS_KEYWORDS: &[&str] = &["streaming", "video", "voice", "multimedia"];
const JITTER_KEYWORDS: &[&str] = &["real-time", "real time", "gaming", "voice", "video-call"];

fn count_matches(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

/// Translate free text to a [`QosProfile`]. Pure function: given the same
/// input, always returns the same output (Testable Property 1).
pub fn translate(text: &str) -> Result<QosProfile> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(IntentError::EmptyIntent.into());
    }

    let lower = trimmed.to_lowercase();

    let embb = count_matches(&lower, EMBB_KEYWORDS);
    let urllc = count_matches(&lower, URLLC_KEYWORDS);
    let mmtc = count_matches(&lower, MMTC_KEYWORDS);
    let balanced = count_matches(&lower, BALANCED_KEYWORDS);

    // Priority order on ties: uRLLC > eMBB > mMTC > balanced. mMTC is a
    // fourth class so every declared slice_type is reachable from free
    // text, not just the three most common ones.
    let max_score = embb.max(urllc).max(mmtc).max(balanced);

    let slice_type = if max_score == 0 {
        SliceType::Balanced
    } else if urllc == max_score {
        SliceType::Urllc
    } else if embb == max_score {
        SliceType::Embb
    } else if mmtc == max_score {
        SliceType::Mmtc
    } else {
        SliceType::Balanced
    };

    let mut profile = match slice_type {
        SliceType::Embb => QosProfile {
            bandwidth: 5.0,
            latency: 9.0,
            jitter: None,
            packet_loss: None,
            reliability: None,
            slice_type,
        },
        SliceType::Urllc => QosProfile {
            bandwidth: 1.0,
            latency: 1.0,
            jitter: None,
            packet_loss: None,
            reliability: Some(99.99),
            slice_type,
        },
        SliceType::Mmtc => QosProfile {
            bandwidth: 2.0,
            latency: 12.0,
            jitter: None,
            packet_loss: None,
            reliability: None,
            slice_type,
        },
        SliceType::Balanced => QosProfile {
            bandwidth: 3.0,
            latency: 9.0,
            jitter: None,
            packet_loss: None,
            reliability: None,
            slice_type,
        },
    };

    if count_matches(&lower, RELIABILITY_KEYWORDS) > 0 {
        profile.reliability = Some(99.99);
    }
    if count_matches(&lower, PACKET_LOSS_KEYWORDS) > 0 {
        profile.packet_loss = Some(0.1);
    }
    if count_matches(&lower, JITTER_KEYWORDS) > 0 {
        profile.jitter = Some(1.0);
    }

    profile.validate()?;
    Ok(profile)
}

/// Parse an intents file: one intent per line, `#` starts a comment,
/// blank lines skipped.
pub fn parse_intents_file(content: &str) -> Vec<&str> {
    content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_intent_is_rejected() {
        assert!(translate("").is_err());
        assert!(translate("   ").is_err());
    }

    #[test]
    fn unmatched_text_falls_back_to_balanced() {
        let p = translate("please deploy something").unwrap();
        assert_eq!(p.slice_type, SliceType::Balanced);
        assert_eq!(p.bandwidth, 3.0);
    }

    #[test]
    fn scenario_a_embb_video_streaming() {
        let p = translate("HD video streaming").unwrap();
        assert_eq!(p.slice_type, SliceType::Embb);
        assert_eq!(p.bandwidth, 5.0);
        assert_eq!(p.latency, 9.0);
        assert_eq!(p.packet_loss, Some(0.1));
    }

    #[test]
    fn scenario_b_urllc_emergency_industrial() {
        let p = translate("Emergency industrial control, ultra-low latency").unwrap();
        assert_eq!(p.slice_type, SliceType::Urllc);
        assert_eq!(p.bandwidth, 1.0);
        assert_eq!(p.latency, 1.0);
        assert_eq!(p.reliability, Some(99.99));
    }

    #[test]
    fn mmtc_reachable_from_iot_keywords() {
        let p = translate("massive iot sensor telemetry deployment").unwrap();
        assert_eq!(p.slice_type, SliceType::Mmtc);
    }

    #[test]
    fn gaming_adds_jitter() {
        let p = translate("real-time gaming session").unwrap();
        assert!(p.jitter.is_some());
    }

    #[test]
    fn translate_is_deterministic() {
        let a = translate("HD video streaming for mobile users").unwrap();
        let b = translate("HD video streaming for mobile users").unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn schema_rejects_out_of_range_bandwidth() {
        let mut p = translate("HD video streaming").unwrap();
        p.bandwidth = 999.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn parse_intents_skips_comments_and_blanks() {
        let content = "# comment\n\nHD video streaming\n  \nEmergency industrial control\n";
        let lines = parse_intents_file(content);
        assert_eq!(lines, vec!["HD video streaming", "Emergency industrial control"]);
    }
}
