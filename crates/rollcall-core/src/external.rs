//! Face embedder backed by an external recognition program.
//!
//! The program is invoked once per frame as
//! `<program> [args..] --width W --height H --model-dir DIR`, receives the
//! packed RGB8 pixels on stdin and prints a single JSON object on stdout:
//! `{"descriptor": [..]}` when a face was found, `{"descriptor": null}` when not.

use crate::embedder::{EmbedError, EmbedderLoader, FaceEmbedder};
use crate::types::Embedding;
use serde::Deserialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Deserialize)]
struct EmbedderOutput {
    descriptor: Option<Vec<f32>>,
    #[serde(default)]
    model: Option<String>,
}

/// Settings for launching the external embedder.
#[derive(Debug, Clone)]
pub struct ExternalEmbedderConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub model_dir: PathBuf,
    /// Kill the program if it has not exited after this long.
    pub timeout: Option<Duration>,
}

impl EmbedderLoader for ExternalEmbedderConfig {
    type Embedder = ExternalEmbedder;

    fn load(&self) -> Result<ExternalEmbedder, EmbedError> {
        if !self.model_dir.is_dir() {
            return Err(EmbedError::ModelNotFound(
                self.model_dir.display().to_string(),
            ));
        }
        // Bare names are resolved through PATH at spawn time.
        if self.program.components().count() > 1 && !self.program.exists() {
            return Err(EmbedError::ProgramNotFound(
                self.program.display().to_string(),
            ));
        }

        tracing::info!(
            program = %self.program.display(),
            model_dir = %self.model_dir.display(),
            "using external face embedder"
        );

        Ok(ExternalEmbedder {
            config: self.clone(),
        })
    }
}

pub struct ExternalEmbedder {
    config: ExternalEmbedderConfig,
}

impl ExternalEmbedder {
    pub fn program(&self) -> &Path {
        &self.config.program
    }
}

impl FaceEmbedder for ExternalEmbedder {
    fn embed(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Embedding>, EmbedError> {
        let expected = width as usize * height as usize * 3;
        if expected == 0 || rgb.len() < expected {
            return Err(EmbedError::InvalidFrame {
                expected,
                actual: rgb.len(),
            });
        }

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg("--width")
            .arg(width.to_string())
            .arg("--height")
            .arg(height.to_string())
            .arg("--model-dir")
            .arg(&self.config.model_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EmbedError::ProgramNotFound(self.config.program.display().to_string())
                } else {
                    EmbedError::Io(e)
                }
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let frame = &rgb[..expected];
        let timeout = self.config.timeout;

        // The program may log before it reads the frame, so stdin is fed
        // while both output pipes are drained.
        let (status, stdout, stderr) = std::thread::scope(|s| {
            s.spawn(move || {
                if let Some(mut stdin) = stdin {
                    // A program that exits early closes the pipe; its exit
                    // status carries the real error.
                    if let Err(e) = stdin.write_all(frame) {
                        tracing::debug!(error = %e, "embedder closed stdin early");
                    }
                }
            });
            let out = s.spawn(move || read_pipe(stdout));
            let err = s.spawn(move || read_pipe(stderr));

            let status = wait_with_deadline(&mut child, timeout);
            (
                status,
                out.join().unwrap_or_default(),
                err.join().unwrap_or_default(),
            )
        });

        let status = status?;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            return Err(EmbedError::EmbedderFailed(format!(
                "{} exited with {status}: {stderr}",
                self.config.program.display(),
            )));
        }

        let parsed: EmbedderOutput = serde_json::from_slice(&stdout)?;
        let Some(values) = parsed.descriptor else {
            tracing::debug!(width, height, "no face found");
            return Ok(None);
        };
        if values.is_empty() {
            return Err(EmbedError::EmptyDescriptor);
        }

        tracing::debug!(dim = values.len(), "frame embedded");
        Ok(Some(Embedding {
            values,
            model_version: parsed.model,
        }))
    }
}

fn read_pipe(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf) {
            tracing::debug!(error = %e, "failed to read embedder output");
        }
    }
    buf
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Option<Duration>,
) -> Result<ExitStatus, EmbedError> {
    let Some(timeout) = timeout else {
        return Ok(child.wait()?);
    };
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            tracing::warn!(pid = child.id(), ?timeout, "embedder timed out, killing it");
            // The child may have exited since try_wait; either way reap it.
            let _ = child.kill();
            let _ = child.wait();
            return Err(EmbedError::TimedOut(timeout));
        }
        std::thread::sleep(WAIT_POLL_INTERVAL);
    }
}
