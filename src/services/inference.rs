use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{Classify, ErrorClass};

/// One detector invocation.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Local image to run detection on
    pub source: PathBuf,
    /// Parent directory for run outputs
    pub project: PathBuf,
    /// Run namespace under `project`; the job id, so runs never collide
    pub name: String,
}

/// Where a finished run left its files.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub run_dir: PathBuf,
}

impl InferenceOutput {
    /// Annotated copy of the source image.
    pub fn annotated_image(&self, file_name: &str) -> PathBuf {
        self.run_dir.join(file_name)
    }

    /// Label file: one `class cx cy w h` line per detection.
    pub fn label_file(&self, file_name: &str) -> PathBuf {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.run_dir.join("labels").join(format!("{stem}.txt"))
    }
}

/// Object detector writing annotated images and label files to disk.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn detect(&self, request: &InferenceRequest) -> Result<InferenceOutput, InferenceError>;
}

/// Runs a YOLO-style `detect.py` as a child process.
#[derive(Debug, Clone)]
pub struct DetectorProcess {
    program: String,
    script: PathBuf,
    weights: PathBuf,
    data_config: PathBuf,
}

impl DetectorProcess {
    pub fn new(program: &str, script: &Path, weights: &Path, data_config: &Path) -> Self {
        Self {
            program: program.to_string(),
            script: script.to_path_buf(),
            weights: weights.to_path_buf(),
            data_config: data_config.to_path_buf(),
        }
    }

    fn args(&self, request: &InferenceRequest) -> Vec<std::ffi::OsString> {
        vec![
            self.script.clone().into(),
            "--weights".into(),
            self.weights.clone().into(),
            "--data".into(),
            self.data_config.clone().into(),
            "--source".into(),
            request.source.clone().into(),
            "--project".into(),
            request.project.clone().into(),
            "--name".into(),
            request.name.clone().into(),
            "--save-txt".into(),
            "--exist-ok".into(),
        ]
    }
}

#[async_trait]
impl InferenceEngine for DetectorProcess {
    async fn detect(&self, request: &InferenceRequest) -> Result<InferenceOutput, InferenceError> {
        tracing::debug!(
            program = %self.program,
            source = %request.source.display(),
            name = %request.name,
            "Spawning detector"
        );

        let output = Command::new(&self.program)
            .args(self.args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| InferenceError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InferenceError::Failed {
                code: output.status.code(),
                stderr: tail(&stderr, 2048).to_string(),
            });
        }

        Ok(InferenceOutput {
            run_dir: request.project.join(&request.name),
        })
    }
}

fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Failed to start detector {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Detector exited with code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

impl Classify for InferenceError {
    fn class(&self) -> ErrorClass {
        match self {
            InferenceError::Spawn { source, .. }
                if matches!(source.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) =>
            {
                ErrorClass::Configuration
            }
            _ => ErrorClass::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> InferenceOutput {
        InferenceOutput {
            run_dir: PathBuf::from("static/data/job-1/runs/job-1"),
        }
    }

    #[test]
    fn test_output_locations() {
        let out = output();
        assert_eq!(
            out.annotated_image("street.jpg"),
            PathBuf::from("static/data/job-1/runs/job-1/street.jpg")
        );
        assert_eq!(
            out.label_file("street.jpg"),
            PathBuf::from("static/data/job-1/runs/job-1/labels/street.txt")
        );
    }

    #[test]
    fn test_label_file_keeps_inner_dots() {
        assert_eq!(
            output().label_file("img.2024.png"),
            PathBuf::from("static/data/job-1/runs/job-1/labels/img.2024.txt")
        );
    }

    #[test]
    fn test_detector_arguments() {
        let detector = DetectorProcess::new(
            "python",
            Path::new("detect.py"),
            Path::new("yolov5s.pt"),
            Path::new("data/coco128.yaml"),
        );
        let args = detector.args(&InferenceRequest {
            source: PathBuf::from("w/in/cat.jpg"),
            project: PathBuf::from("w/runs"),
            name: "job-7".to_string(),
        });
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "detect.py");
        assert!(args.windows(2).any(|w| w == ["--name", "job-7"]));
        assert!(args.windows(2).any(|w| w == ["--source", "w/in/cat.jpg"]));
        assert!(args.contains(&"--save-txt".to_string()));
    }

    #[test]
    fn test_missing_program_is_fatal() {
        let err = InferenceError::Spawn {
            program: "python".to_string(),
            source: std::io::Error::from(ErrorKind::NotFound),
        };
        assert!(err.is_fatal());

        let err = InferenceError::Failed {
            code: Some(1),
            stderr: "CUDA out of memory".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn test_nonexistent_program_reports_spawn_error() {
        let detector = DetectorProcess::new(
            "definitely-not-a-detector-binary",
            Path::new("detect.py"),
            Path::new("w.pt"),
            Path::new("d.yaml"),
        );
        let err = detector
            .detect(&InferenceRequest {
                source: PathBuf::from("x.jpg"),
                project: PathBuf::from("runs"),
                name: "j".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Spawn { .. }));
        assert!(err.is_fatal());
    }
}
