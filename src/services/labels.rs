use garde::Validate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Classify, ErrorClass};
use crate::models::prediction::DetectionLabel;

/// Class index to class name table of the model's dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassNames(Vec<String>);

#[derive(Deserialize)]
struct DatasetConfig {
    names: NamesField,
}

/// YOLO dataset files list names either as a sequence or as an index map.
#[derive(Deserialize)]
#[serde(untagged)]
enum NamesField {
    List(Vec<String>),
    Indexed(BTreeMap<usize, String>),
}

impl ClassNames {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, LabelError> {
        let config: DatasetConfig = serde_yaml::from_str(yaml)?;
        let names = match config.names {
            NamesField::List(names) => names,
            NamesField::Indexed(map) => {
                let mut names = Vec::with_capacity(map.len());
                for (expected, (index, name)) in map.into_iter().enumerate() {
                    if index != expected {
                        return Err(LabelError::SparseClassTable(expected));
                    }
                    names.push(name);
                }
                names
            }
        };
        Ok(Self(names))
    }

    pub fn load(path: &Path) -> Result<Self, LabelError> {
        let yaml = std::fs::read_to_string(path).map_err(|e| LabelError::ClassTable {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse a detector label file. Blank lines are skipped; every other line
/// must be `class_index cx cy width height`.
pub fn parse_label_file(
    contents: &str,
    classes: &ClassNames,
) -> Result<Vec<DetectionLabel>, LabelError> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            parse_line(line, classes).map_err(|reason| LabelError::Line { line: i + 1, reason })
        })
        .collect()
}

fn parse_line(line: &str, classes: &ClassNames) -> Result<DetectionLabel, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [class_index, cx, cy, width, height] = fields.as_slice() else {
        return Err(format!("expected 5 fields, found {}", fields.len()));
    };

    let index: usize = class_index
        .parse()
        .map_err(|_| format!("invalid class index {class_index:?}"))?;
    let class_name = classes
        .get(index)
        .ok_or_else(|| format!("class index {index} outside table of {}", classes.len()))?;

    let coord = |name: &str, raw: &str| -> Result<f64, String> {
        raw.parse::<f64>()
            .map_err(|_| format!("invalid {name} {raw:?}"))
    };

    let label = DetectionLabel {
        class_name: class_name.to_string(),
        cx: coord("cx", *cx)?,
        cy: coord("cy", *cy)?,
        width: coord("width", *width)?,
        height: coord("height", *height)?,
    };
    label.validate().map_err(|report| report.to_string())?;
    Ok(label)
}

#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    #[error("Malformed label line {line}: {reason}")]
    Line { line: usize, reason: String },

    #[error("Failed to read class table {path}: {source}")]
    ClassTable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid dataset config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Class table has no entry for index {0}")]
    SparseClassTable(usize),
}

impl Classify for LabelError {
    fn class(&self) -> ErrorClass {
        match self {
            LabelError::Line { .. } => ErrorClass::Data,
            _ => ErrorClass::Configuration,
        }
    }
}
