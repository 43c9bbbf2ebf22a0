//! Scene manifests.
//!
//! A manifest describes one experiment: where its measurement files
//! live, the experiment time range and the participating devices.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the scene was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneType {
    /// One data file, optional ground truth file.
    Plain,
    /// A folder of per-device files plus an evader map.
    Game,
}

/// Which kind of measurements the scene contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Signal,
    Location,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Signal => write!(f, "signal"),
            DataSource::Location => write!(f, "location"),
        }
    }
}

impl std::str::FromStr for DataSource {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "signal" => Ok(DataSource::Signal),
            "location" => Ok(DataSource::Location),
            other => Err(Error::InvalidParameters(format!(
                "unsupported data source: {other}"
            ))),
        }
    }
}

/// Scene payload for [`SceneType::Plain`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlainSceneData {
    /// Path to the location or signal file.
    pub data_file: PathBuf,
    /// Path to the ground truth file, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth_file: Option<PathBuf>,
}

/// Scene payload for [`SceneType::Game`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameSceneData {
    /// Folder holding the per-device scan and follow-event files.
    pub folder: PathBuf,
    /// Device id -> numeric evader id.
    pub evaders: HashMap<String, i32>,
    /// Only required when the data type is "location".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_file: Option<PathBuf>,
}

impl GameSceneData {
    pub fn is_evader(&self, device: &str) -> bool {
        self.evaders.contains_key(device)
    }

    /// The scan-result file of a device inside the game folder.
    pub fn scan_file(&self, device: &str) -> PathBuf {
        self.folder.join(format!("{device}.scanresult.csv"))
    }

    /// The follow-event file of a device inside the game folder.
    pub fn follow_event_file(&self, device: &str) -> PathBuf {
        self.folder.join(format!("{device}.followevent.csv"))
    }
}

/// The shape of the `data` object depends on the scene type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SceneData {
    Plain(PlainSceneData),
    Game(GameSceneData),
}

/// The parsed manifest of one experiment scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneManifest {
    pub name: String,
    pub scene_type: SceneType,
    pub data_type: DataSource,
    /// First timestamp of the experiment.
    pub start: i64,
    /// Last timestamp of the experiment (inclusive).
    pub end: i64,
    /// Device ids taking part in the experiment.
    pub targets: Vec<String>,
    pub data: SceneData,
}

impl SceneManifest {
    /// Reads and validates a manifest. Relative paths inside the
    /// manifest are resolved against the manifest's own directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut manifest: SceneManifest = serde_json::from_reader(BufReader::new(file))?;

        let folder = path.parent().unwrap_or_else(|| Path::new("."));
        manifest.resolve_paths(folder);
        manifest.validate()?;
        Ok(manifest)
    }

    fn resolve_paths(&mut self, folder: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = folder.join(p.as_path());
            }
        };

        match &mut self.data {
            SceneData::Plain(plain) => {
                resolve(&mut plain.data_file);
                if let Some(gt) = &mut plain.ground_truth_file {
                    resolve(gt);
                }
            }
            SceneData::Game(game) => {
                resolve(&mut game.folder);
                if let Some(location) = &mut game.location_file {
                    resolve(location);
                }
            }
        }
    }

    /// Checks the manifest for consistency, collecting every problem.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.name.is_empty() {
            problems.push("scene name is empty".to_string());
        }
        if self.start < 0 {
            problems.push(format!("invalid start time: {}", self.start));
        }
        if self.end < self.start {
            problems.push(format!("invalid end time: {}", self.end));
        }
        if self.targets.is_empty() {
            problems.push("no targets specified".to_string());
        }

        match (&self.data, self.scene_type) {
            (SceneData::Plain(plain), SceneType::Plain) => {
                if plain.data_file.as_os_str().is_empty() {
                    problems.push("no data file specified".to_string());
                }
            }
            (SceneData::Game(game), SceneType::Game) => {
                if game.folder.as_os_str().is_empty() {
                    problems.push("no folder specified".to_string());
                }
                if game.evaders.is_empty() {
                    problems.push("no evaders specified".to_string());
                }
                for evader in game.evaders.keys() {
                    if !self.targets.contains(evader) {
                        problems.push(format!("evader is not in targets: {evader}"));
                    }
                }
                if self.data_type == DataSource::Location && game.location_file.is_none() {
                    problems.push("no location file specified".to_string());
                }
            }
            _ => {
                problems.push("scene data does not match the scene type".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::MalformedInput(problems.join("; ")))
        }
    }

    /// The plain payload; fails if this is a game scene.
    pub fn plain_data(&self) -> Result<&PlainSceneData> {
        match &self.data {
            SceneData::Plain(plain) => Ok(plain),
            SceneData::Game(_) => Err(Error::MalformedInput(
                "scene does not contain plain data".into(),
            )),
        }
    }

    /// The game payload; fails if this is a plain scene.
    pub fn game_data(&self) -> Result<&GameSceneData> {
        match &self.data {
            SceneData::Game(game) => Ok(game),
            SceneData::Plain(_) => Err(Error::MalformedInput(
                "scene does not contain game data".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn plain_manifest() -> SceneManifest {
        SceneManifest {
            name: "corridor".into(),
            scene_type: SceneType::Plain,
            data_type: DataSource::Signal,
            start: 100,
            end: 200,
            targets: vec!["DEV_1".into(), "DEV_2".into()],
            data: SceneData::Plain(PlainSceneData {
                data_file: "scans.csv".into(),
                ground_truth_file: Some("truth.txt".into()),
            }),
        }
    }

    #[test]
    fn parses_plain_manifest_json() {
        let json = r#"{
            "name": "corridor",
            "scene_type": "plain",
            "data_type": "signal",
            "start": 100,
            "end": 200,
            "targets": ["DEV_1", "DEV_2"],
            "data": { "data_file": "scans.csv", "ground_truth_file": "truth.txt" }
        }"#;
        let manifest: SceneManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest, plain_manifest());
        manifest.validate().unwrap();
    }

    #[test]
    fn parses_game_manifest_json() {
        let json = r#"{
            "name": "catch",
            "scene_type": "game",
            "data_type": "signal",
            "start": 0,
            "end": 50,
            "targets": ["EV_1", "DEV_1"],
            "data": { "folder": "game-data", "evaders": { "EV_1": 1 } }
        }"#;
        let manifest: SceneManifest = serde_json::from_str(json).unwrap();
        manifest.validate().unwrap();

        let game = manifest.game_data().unwrap();
        assert!(game.is_evader("EV_1"));
        assert!(!game.is_evader("DEV_1"));
        assert_eq!(
            game.scan_file("DEV_1"),
            PathBuf::from("game-data/DEV_1.scanresult.csv")
        );
        assert_eq!(
            game.follow_event_file("DEV_1"),
            PathBuf::from("game-data/DEV_1.followevent.csv")
        );
    }

    #[test]
    fn validation_collects_problems() {
        let mut manifest = plain_manifest();
        manifest.name.clear();
        manifest.end = 0;
        manifest.targets.clear();

        let error = manifest.validate().unwrap_err();
        let message = error.to_string();
        assert!(message.contains("scene name is empty"));
        assert!(message.contains("invalid end time"));
        assert!(message.contains("no targets specified"));
    }

    #[test]
    fn game_scene_requires_evaders_among_targets() {
        let manifest = SceneManifest {
            name: "catch".into(),
            scene_type: SceneType::Game,
            data_type: DataSource::Location,
            start: 0,
            end: 10,
            targets: vec!["DEV_1".into()],
            data: SceneData::Game(GameSceneData {
                folder: "game".into(),
                evaders: HashMap::from([("EV_1".to_string(), 1)]),
                location_file: None,
            }),
        };

        let message = manifest.validate().unwrap_err().to_string();
        assert!(message.contains("evader is not in targets: EV_1"));
        assert!(message.contains("no location file specified"));
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("scene.json");
        let mut file = File::create(&manifest_path).unwrap();
        write!(
            file,
            r#"{{
                "name": "corridor",
                "scene_type": "plain",
                "data_type": "signal",
                "start": 0,
                "end": 10,
                "targets": ["DEV_1"],
                "data": {{ "data_file": "scans.csv" }}
            }}"#
        )
        .unwrap();

        let manifest = SceneManifest::load(&manifest_path).unwrap();
        let plain = manifest.plain_data().unwrap();
        assert_eq!(plain.data_file, dir.path().join("scans.csv"));
        assert_eq!(plain.ground_truth_file, None);
    }
}
