//! Maze and center assignment
//!
//! Sessions are recorded four animals at a time, one per maze, into a single
//! "mother" video named after all four animals in maze order:
//!
//! ```text
//! mother: FoodOnly_7_30_25_S1P_Carrot_Cauliflower_Kale_None.mp4
//! split:  FoodOnly_7_30_25_S1P_Cauliflower.mp4   -> maze 2
//! ```
//!
//! The mother videos (or a CSV listing their names) are the reference
//! mapping. A split video whose session or animal is not in it simply gets
//! no maze.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::error::{IngestError, IngestResult};
use crate::locate::walk_files;
use crate::parser::rules::{strip_extension, strip_trial_suffix};
use crate::parser::{clean_stem, ParsedName};

/// Everything before the trailing four animal tokens is the session prefix.
static MOTHER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<prefix>.+?)_(?P<animals>(?:[^_]+_){3}[^_]+)$").expect("mother name regex")
});

/// Session prefix (`Task_MM_DD_YY_HealthCode`) to animals in maze order.
#[derive(Debug, Clone, Default)]
pub struct MotherIndex {
    prefix_to_animals: HashMap<String, Vec<String>>,
}

impl MotherIndex {
    /// Index mother video names.
    ///
    /// Names are taken in sorted order, so when several videos of one
    /// session disagree on the animal order the first name wins whatever
    /// order they were listed in.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        names.sort();

        let mut prefix_to_animals: HashMap<String, Vec<String>> = HashMap::new();
        for name in &names {
            let base = strip_trial_suffix(strip_extension(name));
            let Some(caps) = MOTHER_NAME.captures(base) else {
                continue;
            };
            let animals: Vec<String> = caps["animals"].split('_').map(str::to_string).collect();
            match prefix_to_animals.entry(caps["prefix"].to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert(animals);
                }
                Entry::Occupied(kept) if *kept.get() != animals => {
                    warn!(
                        session = %kept.key(),
                        ignored = %name,
                        "mother videos disagree on animal order, keeping the first"
                    );
                }
                Entry::Occupied(_) => {}
            }
        }
        Self { prefix_to_animals }
    }

    /// Load from a directory of mother videos or a CSV of their names.
    ///
    /// The CSV uses its `video_name` column, or the first column when there
    /// is none.
    pub fn load(reference: &Path, video_extensions: &[String]) -> IngestResult<Self> {
        let index = if reference.is_dir() {
            let names: Vec<String> = walk_files(reference)
                .filter(|e| has_extension(e.path(), video_extensions))
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            Self::from_names(names)
        } else if reference.is_file() {
            Self::from_names(read_name_column(reference)?)
        } else {
            return Err(IngestError::Config(format!(
                "reference mapping not found: {}",
                reference.display()
            )));
        };

        info!(
            reference = %reference.display(),
            sessions = index.len(),
            "loaded mother video mapping"
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.prefix_to_animals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefix_to_animals.is_empty()
    }

    pub fn animals(&self, prefix: &str) -> Option<&[String]> {
        self.prefix_to_animals.get(prefix).map(Vec::as_slice)
    }

    /// 1-based maze position of the split video's animal in its session.
    pub fn maze_number(&self, video_name: &str) -> Option<u8> {
        let (stem, _) = clean_stem(video_name);
        let tokens: Vec<&str> = stem.split('_').collect();
        if tokens.len() < 6 {
            return None;
        }

        let prefix = tokens[..5].join("_");
        let animal = tokens[5];
        let animals = self.animals(&prefix)?;

        let position = animals.iter().position(|a| a.eq_ignore_ascii_case(animal))?;
        u8::try_from(position + 1).ok()
    }
}

pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn read_name_column(path: &Path) -> IngestResult<Vec<String>> {
    let bad = |e: csv::Error| {
        IngestError::Config(format!("unreadable reference mapping {}: {}", path.display(), e))
    };

    let mut reader = csv::Reader::from_path(path).map_err(bad)?;
    let column = reader
        .headers()
        .map_err(bad)?
        .iter()
        .position(|h| h.trim() == "video_name")
        .unwrap_or(0);

    let mut names = Vec::new();
    for record in reader.records() {
        let record = record.map_err(bad)?;
        if let Some(name) = record.get(column).map(str::trim).filter(|n| !n.is_empty()) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

// ============================================================================
// Center labels
// ============================================================================

/// How the `center` column is filled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CenterRule {
    /// Leave center empty
    #[default]
    None,
    /// Use the quadrant suffix of the file name (`top_left`, ...)
    Quadrant,
    /// Look the label up by maze number
    ByMaze(BTreeMap<u8, String>),
}

impl CenterRule {
    pub fn label(&self, maze: Option<u8>, parsed: &ParsedName) -> Option<String> {
        match self {
            CenterRule::None => None,
            CenterRule::Quadrant => parsed.quadrant.clone(),
            CenterRule::ByMaze(labels) => maze.and_then(|m| labels.get(&m).cloned()),
        }
    }
}

/// Spatial placement of one trial.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placement {
    pub maze: Option<u8>,
    pub center: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MazeAssigner {
    mothers: Option<MotherIndex>,
    center: CenterRule,
}

impl MazeAssigner {
    pub fn new(mothers: Option<MotherIndex>, center: CenterRule) -> Self {
        Self { mothers, center }
    }

    /// Whether a reference mapping was loaded at all.
    pub fn has_reference(&self) -> bool {
        self.mothers.is_some()
    }

    pub fn assign(&self, video_name: &str, parsed: &ParsedName) -> Placement {
        let maze = self
            .mothers
            .as_ref()
            .and_then(|index| index.maze_number(video_name));
        if maze.is_none() {
            debug!(video = video_name, "no maze in reference mapping");
        }
        Placement {
            maze,
            center: self.center.label(maze, parsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::FilenameParser;

    fn index() -> MotherIndex {
        MotherIndex::from_names([
            "FoodOnly_7_30_25_S1P_Carrot_Cauliflower_Kale_None.mp4",
            "ToyOnly_8_1_25_S2Y_Doc_Rex_Fig_Bean_Trial2.mp4",
        ])
    }

    // ==========================================================================
    // MOTHER VIDEO MAPPING
    // ==========================================================================

    #[test]
    fn test_prefix_map() {
        let idx = index();
        assert_eq!(idx.len(), 2);
        assert_eq!(
            idx.animals("FoodOnly_7_30_25_S1P").unwrap(),
            &["Carrot", "Cauliflower", "Kale", "None"]
        );
        // Trial suffix on the mother video is not part of the prefix
        assert!(idx.animals("ToyOnly_8_1_25_S2Y").is_some());
    }

    #[test]
    fn test_maze_number_by_position() {
        let idx = index();
        assert_eq!(idx.maze_number("FoodOnly_7_30_25_S1P_Carrot.mp4"), Some(1));
        assert_eq!(idx.maze_number("FoodOnly_7_30_25_S1P_Cauliflower.mp4"), Some(2));
        assert_eq!(idx.maze_number("FoodOnly_7_30_25_S1P_Kale.mp4"), Some(3));
        assert_eq!(idx.maze_number("ToyOnly_8_1_25_S2Y_Bean.mp4"), Some(4));
    }

    #[test]
    fn test_maze_number_is_case_insensitive_and_ignores_suffixes() {
        let idx = index();
        assert_eq!(idx.maze_number("FoodOnly_7_30_25_S1P_cauliflower.mp4"), Some(2));
        assert_eq!(idx.maze_number("FoodOnly_7_30_25_S1P_Kale_Trial1.mp4"), Some(3));
        assert_eq!(idx.maze_number("FoodOnly_7_30_25_S1P_Kale_top_right.mp4"), Some(3));
    }

    #[test]
    fn test_maze_number_absent() {
        let idx = index();
        // Unknown session
        assert_eq!(idx.maze_number("FoodOnly_7_31_25_S1P_Carrot.mp4"), None);
        // Unknown animal
        assert_eq!(idx.maze_number("FoodOnly_7_30_25_S1P_Beet.mp4"), None);
        // Too few tokens
        assert_eq!(idx.maze_number("FoodOnly_7_30_25.mp4"), None);
        assert_eq!(MotherIndex::default().maze_number("FoodOnly_7_30_25_S1P_Carrot.mp4"), None);
    }

    #[test]
    fn test_conflicting_sessions_resolve_the_same_in_any_order() {
        let first = "FoodOnly_7_30_25_S1P_Carrot_Cauliflower_Kale_None_Trial1.mp4";
        let second = "FoodOnly_7_30_25_S1P_Kale_None_Carrot_Cauliflower_Trial2.mp4";

        let forward = MotherIndex::from_names([first, second]);
        let backward = MotherIndex::from_names([second, first]);
        assert_eq!(forward.len(), 1);
        assert_eq!(
            forward.animals("FoodOnly_7_30_25_S1P"),
            backward.animals("FoodOnly_7_30_25_S1P")
        );
        assert_eq!(backward.maze_number("FoodOnly_7_30_25_S1P_Kale.mp4"), Some(3));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("WhiteAnimals10X");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("FoodOnly_7_30_25_S1P_Carrot_Cauliflower_Kale_None.mp4"), b"x").unwrap();
        std::fs::write(sub.join("notes.txt"), b"x").unwrap();

        let idx = MotherIndex::load(dir.path(), &["mp4".to_string()]).unwrap();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.maze_number("FoodOnly_7_30_25_S1P_Kale.mp4"), Some(3));
    }

    #[test]
    fn test_load_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mothers.csv");
        std::fs::write(
            &path,
            "folder,video_name\nraw,FoodOnly_7_30_25_S1P_Carrot_Cauliflower_Kale_None.mp4\nraw,\n",
        )
        .unwrap();

        let idx = MotherIndex::load(&path, &["mp4".to_string()]).unwrap();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.maze_number("FoodOnly_7_30_25_S1P_None.mp4"), Some(4));
    }

    #[test]
    fn test_load_missing_reference_is_config_error() {
        let err = MotherIndex::load(Path::new("/nonexistent/raw"), &[]).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    // ==========================================================================
    // CENTER RULES
    // ==========================================================================

    #[test]
    fn test_center_rules() {
        let parser = FilenameParser::new().unwrap();
        let name = "FoodOnly_7_30_25_S1P_Kale_top_left.mp4";
        let parsed = parser.parse_name(name);

        let none = MazeAssigner::new(Some(index()), CenterRule::None);
        assert_eq!(
            none.assign(name, &parsed),
            Placement { maze: Some(3), center: None }
        );

        let quadrant = MazeAssigner::new(Some(index()), CenterRule::Quadrant);
        assert_eq!(quadrant.assign(name, &parsed).center.as_deref(), Some("top_left"));

        let labels = BTreeMap::from([(3, "center_b".to_string())]);
        let by_maze = MazeAssigner::new(Some(index()), CenterRule::ByMaze(labels));
        assert_eq!(by_maze.assign(name, &parsed).center.as_deref(), Some("center_b"));
    }

    #[test]
    fn test_no_reference_means_no_maze() {
        let parser = FilenameParser::new().unwrap();
        let name = "FoodOnly_7_30_25_S1P_Kale.mp4";
        let assigner = MazeAssigner::default();
        assert_eq!(assigner.assign(name, &parser.parse_name(name)), Placement::default());
    }

    #[test]
    fn test_center_rule_from_json() {
        let rule: CenterRule =
            serde_json::from_str(r#"{"by_maze":{"1":"north","2":"south"}}"#).unwrap();
        assert_eq!(
            rule,
            CenterRule::ByMaze(BTreeMap::from([
                (1, "north".to_string()),
                (2, "south".to_string())
            ]))
        );
        let rule: CenterRule = serde_json::from_str(r#""quadrant""#).unwrap();
        assert_eq!(rule, CenterRule::Quadrant);
    }
}
