//! Filename parsing
//!
//! Trial metadata is encoded in the video's file name (task, date, animal,
//! health code) and in the directory it was sorted into (genotype, dose).
//! Parsing never fails: a field no rule can fill is left `None` and reported
//! through [`ParsedName::missing_fields`].
//!
//! ```text
//! SplitVideos/WhiteAnimals10X/FoodLightExcitatory_2_20_25_S1Y_Doc_Trial2.mp4
//!             ^^^^^ ^^         ^^^^^^^^^ ^^^^^^^^^^ ^^^^^^^ ^^^ ^^^ ^^^^^^
//!         genotype  dose         task    modulation  date  health name (dropped)
//! ```

pub mod rules;

use serde::Serialize;
use std::path::Path;
use tracing::debug;

pub use rules::{NameFields, NameRule, PathFields, PathRule};
use rules::{strip_extension, strip_quadrant_suffix, strip_trial_suffix};

/// Everything the parser could recover for one video.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedName {
    /// Tag of the name rule that matched, if any
    pub rule: Option<&'static str>,
    pub task: Option<String>,
    pub modulation: Option<String>,
    pub date: Option<String>,
    pub name: Option<String>,
    pub health: Option<String>,
    pub genotype: Option<String>,
    pub dose_mult: Option<f64>,
    /// Quadrant suffix (`top_left`, ...) stripped from the stem
    pub quadrant: Option<String>,
}

impl ParsedName {
    /// Name-derived fields that stayed unresolved.
    ///
    /// Modulation is optional under a matched rule, so it is only reported
    /// when nothing matched at all. Genotype and dose come from the directory
    /// layout and are never reported here.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.task.is_none() {
            missing.push("task");
        }
        if self.rule.is_none() && self.modulation.is_none() {
            missing.push("modulation");
        }
        if self.date.is_none() {
            missing.push("date");
        }
        if self.name.is_none() {
            missing.push("name");
        }
        if self.health.is_none() {
            missing.push("health");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// Clean a file name down to the stem the rules match against.
///
/// Returns the stem and the quadrant suffix, if one was present.
pub fn clean_stem(file_name: &str) -> (&str, Option<String>) {
    let stem = strip_trial_suffix(strip_extension(file_name));
    let (stem, quadrant) = strip_quadrant_suffix(stem);
    (strip_trial_suffix(stem), quadrant)
}

#[derive(Debug)]
pub struct FilenameParser {
    name_rules: Vec<NameRule>,
    path_rules: Vec<PathRule>,
}

impl FilenameParser {
    /// Parser with the built-in lab conventions.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            name_rules: rules::builtin_name_rules()?,
            path_rules: rules::builtin_path_rules()?,
        })
    }

    /// Parser with no rules; every field comes back `None`.
    pub fn empty() -> Self {
        Self {
            name_rules: Vec::new(),
            path_rules: Vec::new(),
        }
    }

    /// Add a name rule, tried after the existing ones.
    pub fn with_name_rule(mut self, rule: NameRule) -> Self {
        self.name_rules.push(rule);
        self
    }

    /// Add a path rule, tried after the existing ones.
    pub fn with_path_rule(mut self, rule: PathRule) -> Self {
        self.path_rules.push(rule);
        self
    }

    pub fn rule_tags(&self) -> Vec<&'static str> {
        self.name_rules.iter().map(|r| r.tag).collect()
    }

    /// Parse a video path: name rules on the file name, path rules on the
    /// whole path.
    pub fn parse<P: AsRef<Path>>(&self, path: P) -> ParsedName {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut parsed = self.parse_name(&file_name);

        let path_str = path.to_string_lossy();
        if let Some(fields) = self.path_rules.iter().find_map(|r| r.apply(&path_str)) {
            parsed.genotype = fields.genotype;
            parsed.dose_mult = fields.dose_mult;
        }

        parsed
    }

    /// Parse a bare file name (no directory information).
    pub fn parse_name(&self, file_name: &str) -> ParsedName {
        let (stem, quadrant) = clean_stem(file_name);

        let matched = self
            .name_rules
            .iter()
            .find_map(|rule| rule.apply(stem).map(|fields| (rule.tag, fields)));

        match matched {
            Some((tag, fields)) => {
                debug!(file_name, rule = tag, "filename matched");
                ParsedName {
                    rule: Some(tag),
                    task: fields.task,
                    modulation: fields.modulation,
                    date: fields.date,
                    name: fields.name,
                    health: fields.health,
                    quadrant,
                    ..Default::default()
                }
            }
            None => ParsedName {
                quadrant,
                ..Default::default()
            },
        }
    }
}
