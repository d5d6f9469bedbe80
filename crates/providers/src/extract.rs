//! Argument extraction for functional calls.
//!
//! A tool takes one salient entity from the query (for weather services, a
//! place name). Extraction always yields a well-formed value.

use regex_lite::Regex;
use serde_json::{Map, Value};
use sidekick_config::{ArgumentSource, ToolBinding};
use tracing::{debug, warn};

/// Derives a single salient entity from a free-text query.
pub trait ArgumentExtractor: Send + Sync {
    fn extract(&self, query: &str) -> String;
}

const KNOWN_PLACES: &[&str] = &[
    "北京", "上海", "广州", "深圳", "杭州", "南京", "苏州", "成都", "重庆", "武汉", "西安",
    "天津", "青岛", "大连", "厦门", "宁波", "长沙", "郑州", "济南", "合肥", "福州", "昆明",
    "南昌", "长春", "哈尔滨", "石家庄", "太原", "沈阳", "南宁", "贵阳", "兰州", "西宁", "银川",
    "乌鲁木齐", "拉萨", "呼和浩特", "海口", "三亚", "珠海", "东莞", "佛山", "无锡", "常州",
    "温州", "烟台", "徐州", "扬州",
];

/// Question words, time words and weather vocabulary removed before
/// pattern matching. Order matters: longer phrases come first where they
/// overlap.
const FILLER_PHRASES: &[&str] = &[
    "怎么样", "如何", "怎样", "怎么", "吗", "呢", "啊", "呀", "今天", "明天", "后天", "昨天",
    "现在", "这会儿", "冷不冷", "热不热", "会下雨", "会下雪", "下不下雨", "的天气", "天气",
    "气温", "温度", "预报", "查一下", "告诉我", "帮我查", "请问", "想知道",
];

const PLACE_PATTERNS: &[&str] = &[r"^(.+?)的", r"^(.{2,4})(?:市|省|区|县)?$"];

const MIN_PLACE_CHARS: usize = 2;
const MAX_PLACE_CHARS: usize = 10;

/// Extracts a place name: gazetteer, then filler stripping and patterns,
/// then the residual text, then a fixed default.
pub struct PlaceExtractor {
    known: Vec<String>,
    patterns: Vec<Regex>,
    default_place: String,
}

impl Default for PlaceExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaceExtractor {
    pub fn new() -> Self {
        Self {
            known: KNOWN_PLACES.iter().map(|p| p.to_string()).collect(),
            patterns: PLACE_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
            default_place: "北京".into(),
        }
    }

    pub fn with_default_place(mut self, place: impl Into<String>) -> Self {
        self.default_place = place.into();
        self
    }

    /// Add names to the gazetteer. Added names are checked after the
    /// built-in ones.
    pub fn with_known_places<I, S>(mut self, places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known.extend(places.into_iter().map(Into::into));
        self
    }

    fn within_bounds(text: &str) -> bool {
        (MIN_PLACE_CHARS..=MAX_PLACE_CHARS).contains(&text.chars().count())
    }

    fn strip_fillers(query: &str) -> String {
        let mut text = query.trim().replace(['?', '？'], "");
        for phrase in FILLER_PHRASES {
            text = text.replace(phrase, " ");
        }
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl ArgumentExtractor for PlaceExtractor {
    fn extract(&self, query: &str) -> String {
        if let Some(place) = self.known.iter().find(|p| query.contains(p.as_str())) {
            return place.clone();
        }

        let text = Self::strip_fillers(query);

        for pattern in &self.patterns {
            if let Some(found) = pattern.captures(&text).and_then(|c| c.get(1)) {
                let candidate = found.as_str().trim();
                if Self::within_bounds(candidate) {
                    debug!(place = %candidate, "Place matched by pattern");
                    return candidate.to_string();
                }
            }
        }

        if Self::within_bounds(&text) {
            return text;
        }

        warn!(query = %query, default = %self.default_place, "Could not extract place, using default");
        self.default_place.clone()
    }
}

/// Passes the trimmed query through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryPassthrough;

impl ArgumentExtractor for QueryPassthrough {
    fn extract(&self, query: &str) -> String {
        query.trim().to_string()
    }
}

/// Build the argument map for a tool call.
pub fn tool_arguments(
    binding: &ToolBinding,
    query: &str,
    places: &dyn ArgumentExtractor,
) -> Map<String, Value> {
    let value = match binding.source {
        ArgumentSource::Place => places.extract(query),
        ArgumentSource::Query => QueryPassthrough.extract(query),
    };
    let mut arguments = Map::new();
    arguments.insert(binding.argument.clone(), Value::String(value));
    for (key, fixed) in &binding.arguments {
        arguments.entry(key.clone()).or_insert_with(|| fixed.clone());
    }
    arguments
}
