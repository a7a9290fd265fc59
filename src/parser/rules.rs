//! Filename and path rules
//!
//! A rule pairs a pattern with an extractor. The parser tries name rules in
//! order against the cleaned file stem and path rules against the full path,
//! so a new naming convention is one more entry in the list.

use chrono::NaiveDate;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Fields a name rule can fill from a file stem.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameFields {
    pub task: Option<String>,
    pub modulation: Option<String>,
    pub date: Option<String>,
    pub name: Option<String>,
    pub health: Option<String>,
}

/// Fields a path rule can fill from the directory layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathFields {
    pub genotype: Option<String>,
    pub dose_mult: Option<f64>,
}

pub struct NameRule {
    pub tag: &'static str,
    pattern: Regex,
    extract: fn(&Captures<'_>) -> NameFields,
}

impl NameRule {
    pub fn new(
        tag: &'static str,
        pattern: &str,
        extract: fn(&Captures<'_>) -> NameFields,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            tag,
            pattern: Regex::new(pattern)?,
            extract,
        })
    }

    pub fn apply(&self, stem: &str) -> Option<NameFields> {
        self.pattern.captures(stem).map(|caps| (self.extract)(&caps))
    }
}

impl std::fmt::Debug for NameRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameRule")
            .field("tag", &self.tag)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

pub struct PathRule {
    pub tag: &'static str,
    pattern: Regex,
    extract: fn(&Captures<'_>) -> PathFields,
}

impl PathRule {
    pub fn new(
        tag: &'static str,
        pattern: &str,
        extract: fn(&Captures<'_>) -> PathFields,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            tag,
            pattern: Regex::new(pattern)?,
            extract,
        })
    }

    pub fn apply(&self, path: &str) -> Option<PathFields> {
        self.pattern.captures(path).map(|caps| (self.extract)(&caps))
    }
}

impl std::fmt::Debug for PathRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathRule")
            .field("tag", &self.tag)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

// ============================================================================
// Built-in rules
// ============================================================================

/// `Task_MM_DD_YY_HealthCode_Name`, e.g. `FoodLightExcitatory_2_20_25_S1Y_Doc`
const LAB_PATTERN: &str = r"^(?P<task>[A-Za-z]+)_(?P<month>\d{1,2})_(?P<day>\d{1,2})_(?P<year>\d{2})_(?P<health>S\d+[PY]|[PY])_(?P<name>\w+)$";

/// `Task_Modulation_YYYYMMDD_Name_Health`, e.g. `Task1_Mod2_20230115_AnimalA_Healthy`
const COMPACT_PATTERN: &str = r"^(?P<task>[A-Za-z0-9]+)_(?P<modulation>[A-Za-z0-9]+)_(?P<date>\d{8})_(?P<name>[A-Za-z0-9]+)_(?P<health>[A-Za-z]+)$";

/// `.../WhiteAnimals10X/...` or `.../BlackAnimals/...`
const COHORT_PATTERN: &str = r"(?i)(?P<genotype>white|black)animals(?:(?P<dose>\d+(?:\.\d+)?)x)?";

const MODULATIONS: [&str; 2] = ["Excitatory", "Inhibitory"];

pub fn builtin_name_rules() -> Result<Vec<NameRule>, regex::Error> {
    Ok(vec![
        NameRule::new("lab", LAB_PATTERN, extract_lab)?,
        NameRule::new("compact", COMPACT_PATTERN, extract_compact)?,
    ])
}

pub fn builtin_path_rules() -> Result<Vec<PathRule>, regex::Error> {
    Ok(vec![PathRule::new("cohort", COHORT_PATTERN, extract_cohort)?])
}

fn extract_lab(caps: &Captures<'_>) -> NameFields {
    let (task, modulation) = split_modulation(&caps["task"]);
    let health = if caps["health"].ends_with('Y') {
        "saline"
    } else {
        "ghrelin"
    };

    NameFields {
        task,
        modulation,
        date: lab_date(&caps["month"], &caps["day"], &caps["year"]),
        name: Some(caps["name"].to_string()),
        health: Some(health.to_string()),
    }
}

fn extract_compact(caps: &Captures<'_>) -> NameFields {
    NameFields {
        task: Some(caps["task"].to_string()),
        modulation: Some(caps["modulation"].to_string()),
        date: Some(caps["date"].to_string()),
        name: Some(caps["name"].to_string()),
        health: Some(caps["health"].to_string()),
    }
}

fn extract_cohort(caps: &Captures<'_>) -> PathFields {
    PathFields {
        genotype: Some(caps["genotype"].to_ascii_lowercase()),
        dose_mult: caps.name("dose").and_then(|d| d.as_str().parse().ok()),
    }
}

/// Split a trailing modulation word off a task name.
fn split_modulation(raw: &str) -> (Option<String>, Option<String>) {
    for modulation in MODULATIONS {
        if let Some(task) = raw.strip_suffix(modulation) {
            let task = (!task.is_empty()).then(|| task.to_string());
            return (task, Some(modulation.to_string()));
        }
    }
    (Some(raw.to_string()), None)
}

/// Two-digit years are 20YY. Impossible dates yield `None`.
fn lab_date(month: &str, day: &str, year: &str) -> Option<String> {
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    let year: i32 = year.parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day).map(|d| d.format("%Y-%m-%d").to_string())
}

// ============================================================================
// Stem cleanup shared with the maze assigner
// ============================================================================

static TRIAL_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(?:[Tt]rial)[ _-]?\d+$").expect("trial suffix regex"));

static QUADRANT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)_(?P<quadrant>(?:top|bottom)_(?:left|right))$").expect("quadrant suffix regex")
});

/// Drop the extension, if any.
pub fn strip_extension(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

/// Remove a trailing `_Trial1` / `_trial_2` / `_Trial-03`.
pub fn strip_trial_suffix(stem: &str) -> &str {
    match TRIAL_SUFFIX.find(stem) {
        Some(m) => &stem[..m.start()],
        None => stem,
    }
}

/// Remove a trailing `_top_left`-style quadrant, returning it lowercased.
pub fn strip_quadrant_suffix(stem: &str) -> (&str, Option<String>) {
    match QUADRANT_SUFFIX.captures(stem) {
        Some(caps) => {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(stem.len());
            let quadrant = caps["quadrant"].to_ascii_lowercase();
            (&stem[..start], Some(quadrant))
        }
        None => (stem, None),
    }
}
