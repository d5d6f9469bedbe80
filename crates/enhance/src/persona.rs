//! Persona post-processing for generated replies.
//!
//! Three passes run in order: make sure a sentence-final particle is there,
//! maybe append an emoji picked from the reply's mood, then soften blunt
//! phrasings. [`PersonaDiagnostics::inspect`] checks the outcome; callers log
//! it and never act on it.

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sidekick_config::PersonaConfig;
use std::sync::Mutex;
use tracing::debug;

pub const PARTICLES: &[&str] = &["呀", "啦", "呢", "哦", "嘛", "哒", "吖"];

pub const EMOJIS: &[&str] = &[
    "😊", "💕", "✨", "🌸", "💖", "🎀", "💗", "😘", "🌟", "💝", "🥰", "😍", "💓", "🌈", "🎉",
    "💐", "🌺", "⭐", "💫", "🦋", "💪",
];

const POSITIVE_WORDS: &[&str] = &[
    "开心", "高兴", "喜欢", "爱", "温柔", "体贴", "可爱", "好", "棒", "赞", "美", "甜", "暖",
    "舒服", "幸福", "快乐",
];

const NEGATIVE_WORDS: &[&str] = &[
    "讨厌", "烦", "恨", "差", "糟", "坏", "笨", "蠢", "滚", "死", "去死", "白痴", "傻",
];

const SOFTENINGS: &[(&str, &str)] = &[
    ("不行", "不太好呢"),
    ("不可以", "不太可以哦"),
    ("不对", "好像不太对呢"),
    ("错了", "可能有点小问题呢"),
    ("必须", "最好"),
    ("应该", "建议"),
];

/// Mood keywords and the emojis that fit them, checked in order.
const MOODS: &[(&[&str], &[&str])] = &[
    (&["爱", "喜欢", "想你"], &["💕", "💖", "💗", "💝", "🥰", "😍"]),
    (&["开心", "高兴", "哈哈"], &["😊", "🎉", "✨", "🌟"]),
    (&["加油", "努力", "棒"], &["💪", "⭐", "🌟", "✨"]),
    (&["可爱", "萌"], &["🎀", "🌸", "🦋", "💐"]),
];
const DEFAULT_MOOD: &[&str] = &["😊", "💕", "✨", "🌸"];

const TRAILING_PUNCTUATION: &[char] = &['。', '！', '？', ',', '.', '!', '?', ' '];
const QUESTION_ENDINGS: &[char] = &['吗', '呢', '吧'];

pub struct PersonaStyler {
    emoji_probability: f64,
    min_length_for_particle: usize,
    rng: Mutex<StdRng>,
}

impl Default for PersonaStyler {
    fn default() -> Self {
        Self::new(&PersonaConfig::default())
    }
}

impl PersonaStyler {
    pub fn new(config: &PersonaConfig) -> Self {
        let emoji_probability = if config.emoji_probability.is_nan() {
            0.0
        } else {
            config.emoji_probability.clamp(0.0, 1.0)
        };
        Self {
            emoji_probability,
            min_length_for_particle: config.min_length_for_particle,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Use a fixed seed so particle and emoji choices are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn apply(&self, text: &str) -> String {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return text.to_string();
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());

        let with_particle = self.ensure_particle(trimmed, &mut *rng);
        let with_emoji = self.ensure_emoji(&with_particle, &mut *rng);
        let styled = soften(&with_emoji);

        debug!(before = %text, after = %styled, "Applied persona");
        styled
    }

    fn ensure_particle(&self, text: &str, rng: &mut impl Rng) -> String {
        if contains_any(text, PARTICLES) || text.chars().count() <= self.min_length_for_particle {
            return text.to_string();
        }
        let stem = text.trim_end_matches(TRAILING_PUNCTUATION);
        let particle = PARTICLES.choose(rng).copied().unwrap_or("呀");
        let closing = if stem.ends_with(QUESTION_ENDINGS) { "？" } else { "~" };
        format!("{stem}{particle}{closing}")
    }

    fn ensure_emoji(&self, text: &str, rng: &mut impl Rng) -> String {
        if contains_any(text, EMOJIS) || !rng.random_bool(self.emoji_probability) {
            return text.to_string();
        }
        let emoji = pick_emoji(text, rng);
        format!("{} {emoji}", text.trim_end())
    }
}

fn pick_emoji(text: &str, rng: &mut impl Rng) -> &'static str {
    let lowered = text.to_lowercase();
    let candidates = MOODS
        .iter()
        .find(|(keywords, _)| contains_any(&lowered, keywords))
        .map(|(_, emojis)| *emojis)
        .unwrap_or(DEFAULT_MOOD);
    candidates.choose(rng).copied().unwrap_or("😊")
}

fn soften(text: &str) -> String {
    SOFTENINGS
        .iter()
        .fold(text.to_string(), |acc, (blunt, soft)| acc.replace(blunt, soft))
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

/// Outcome of checking a reply against the persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonaDiagnostics {
    pub has_emoji: bool,
    pub has_particle: bool,
    pub has_positive: bool,
    pub negative_hits: Vec<String>,
    /// Has an emoji or a particle, and no negative words.
    pub valid: bool,
}

impl PersonaDiagnostics {
    pub fn inspect(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let has_emoji = contains_any(text, EMOJIS);
        let has_particle = contains_any(text, PARTICLES);
        let has_positive = contains_any(text, POSITIVE_WORDS);
        let negative_hits: Vec<String> = NEGATIVE_WORDS
            .iter()
            .filter(|w| lowered.contains(*w))
            .map(|w| w.to_string())
            .collect();
        let valid = !text.trim().is_empty() && (has_emoji || has_particle) && negative_hits.is_empty();
        Self {
            has_emoji,
            has_particle,
            has_positive,
            negative_hits,
            valid,
        }
    }
}
