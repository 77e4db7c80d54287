//! External audio tooling: capture (recording a topic's live extract) and
//! the cloze cut-and-beep job that turns a cloze span into a (question,
//! answer) item pair.
//!
//! Both halves shell out to an external binary (a `parecord`-style
//! recorder, an `ffmpeg`-style transcoder) via `tokio::process::Command`
//! rather than linking a decode/encode library, mirroring how the rest of
//! the appliance treats the external player as a separate process instead
//! of an in-process dependency.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::process::{Child, Command};

use crate::error::{Error, Result};

/// The beep replacing a cloze span runs for exactly the span's length, so
/// the question track keeps its original runtime.
fn beep_duration(cloze_start: f64, cloze_end: f64) -> f64 {
    (cloze_end - cloze_start).max(0.0)
}

/// Context pulled in on either side of the answer span.
pub const ANSWER_CONTEXT: f64 = 0.3;

/// A single in-progress recording.
struct CaptureHandle {
    child: Child,
    filepath: PathBuf,
}

/// Starts and stops the external recorder, enforcing that only one capture
/// runs at a time.
pub struct CaptureManager {
    recorder_bin: String,
    sink: String,
    handle: Arc<Mutex<Option<CaptureHandle>>>,
}

impl CaptureManager {
    pub fn new(recorder_bin: impl Into<String>, sink: impl Into<String>) -> Self {
        Self {
            recorder_bin: recorder_bin.into(),
            sink: sink.into(),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Start recording to `filepath`. Fails with [`Error::AlreadyCapturing`]
    /// if a capture is already running.
    pub async fn start(&self, filepath: &Path) -> Result<()> {
        {
            let guard = self.handle.lock();
            if guard.is_some() {
                return Err(Error::AlreadyCapturing);
            }
        }

        if let Some(parent) = filepath.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let child = Command::new(&self.recorder_bin)
            .arg("--channels=1")
            .arg("-d")
            .arg(&self.sink)
            .arg(filepath)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::Capture(format!("failed to start {}: {e}", self.recorder_bin)))?;

        *self.handle.lock() = Some(CaptureHandle {
            child,
            filepath: filepath.to_path_buf(),
        });
        Ok(())
    }

    /// Stop the active capture and return the path that was recorded to.
    pub async fn stop(&self) -> Result<PathBuf> {
        let handle = self.handle.lock().take();
        let Some(mut handle) = handle else {
            return Err(Error::InvalidState("no active capture".into()));
        };

        handle
            .child
            .kill()
            .await
            .map_err(|e| Error::Capture(format!("failed to stop recorder: {e}")))?;
        Ok(handle.filepath)
    }
}

/// Deterministic extract filename: `<topic-stem>-<unix-epoch-seconds>.<ext>`.
pub fn extract_filename(topic_stem: &str, extension: &str) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{topic_stem}-{secs}{extension}")
}

/// The two output paths a cloze cut produces from one extract.
#[derive(Debug, Clone, PartialEq)]
pub struct ClozeOutputs {
    pub question: PathBuf,
    pub answer: PathBuf,
}

/// Deterministic output filenames for a cloze cut, so retries overwrite
/// rather than accumulate.
pub fn cloze_output_paths(extract_path: &Path, item_id: i64, items_dir: &Path) -> ClozeOutputs {
    let stem = extract_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "extract".to_string());
    let ext = extract_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".wav".to_string());
    ClozeOutputs {
        question: items_dir.join(format!("{stem}-QUESTION-{item_id}{ext}")),
        answer: items_dir.join(format!("{stem}-ANSWER-{item_id}{ext}")),
    }
}

/// Clamp the answer span to `[0, extract_duration]` after widening it by
/// [`ANSWER_CONTEXT`] seconds on each side.
pub fn answer_span(cloze_start: f64, cloze_end: f64, extract_duration: f64) -> (f64, f64) {
    let start = (cloze_start - ANSWER_CONTEXT).max(0.0);
    let end = (cloze_end + ANSWER_CONTEXT).min(extract_duration.max(cloze_end));
    (start, end)
}

/// Runs the external transcoder to turn one cloze span into a (question,
/// answer) pair. The question is the extract with the cloze span replaced
/// by a beep of the same length; the answer is the cloze span itself,
/// widened by [`ANSWER_CONTEXT`] seconds of surrounding context.
pub struct ClozeCutter {
    cut_bin: String,
}

impl ClozeCutter {
    pub fn new(cut_bin: impl Into<String>) -> Self {
        Self { cut_bin: cut_bin.into() }
    }

    /// Produce both outputs with a single `ffmpeg` invocation (one
    /// `-filter_complex` graph, two `-map`ed outputs) so the pair lands on
    /// disk atomically with respect to this job: either both files are
    /// written or neither is left behind.
    pub async fn cut(
        &self,
        extract_path: &Path,
        extract_duration: f64,
        cloze_start: f64,
        cloze_end: f64,
        item_id: i64,
        items_dir: &Path,
    ) -> Result<ClozeOutputs> {
        tokio::fs::create_dir_all(items_dir).await?;
        let outputs = cloze_output_paths(extract_path, item_id, items_dir);
        let (answer_start, answer_end) = answer_span(cloze_start, cloze_end, extract_duration);
        let beep_dur = beep_duration(cloze_start, cloze_end);

        let filter = format!(
            "[0:a]atrim=0:{cloze_start}[pre];\
             [0:a]atrim=start={cloze_end}[post];\
             sine=frequency=1000:duration={beep_dur}[beep];\
             [pre][beep][post]concat=n=3:v=0:a=1[q];\
             [0:a]atrim=start={answer_start}:end={answer_end}[a]"
        );

        let status = Command::new(&self.cut_bin)
            .arg("-y")
            .arg("-i")
            .arg(extract_path)
            .arg("-filter_complex")
            .arg(filter)
            .arg("-map")
            .arg("[q]")
            .arg(&outputs.question)
            .arg("-map")
            .arg("[a]")
            .arg(&outputs.answer)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map_err(|e| Error::Cut(format!("failed to start {}: {e}", self.cut_bin)))?;

        if !status.success() {
            let _ = tokio::fs::remove_file(&outputs.question).await;
            let _ = tokio::fs::remove_file(&outputs.answer).await;
            return Err(Error::Cut(format!("cloze cut exited with {status}")));
        }

        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beep_duration_matches_cloze_length() {
        assert_eq!(beep_duration(10.0, 12.5), 2.5);
        assert_eq!(beep_duration(10.0, 10.0), 0.0);
    }

    #[test]
    fn test_answer_span_widens_with_context() {
        let (start, end) = answer_span(10.0, 12.0, 100.0);
        assert_eq!(start, 9.7);
        assert_eq!(end, 12.3);
    }

    #[test]
    fn test_answer_span_clamps_at_zero() {
        let (start, _end) = answer_span(0.1, 2.0, 100.0);
        assert_eq!(start, 0.0);
    }

    #[test]
    fn test_answer_span_clamps_at_duration() {
        let (_start, end) = answer_span(8.0, 9.95, 10.0);
        assert_eq!(end, 10.0);
    }

    #[test]
    fn test_cloze_output_paths_are_deterministic() {
        let outputs = cloze_output_paths(Path::new("/media/extracts/yt1-1700.wav"), 42, Path::new("/media/items"));
        assert_eq!(outputs.question, PathBuf::from("/media/items/yt1-1700-QUESTION-42.wav"));
        assert_eq!(outputs.answer, PathBuf::from("/media/items/yt1-1700-ANSWER-42.wav"));
    }

    #[test]
    fn test_extract_filename_includes_topic_stem_and_extension() {
        let name = extract_filename("yt1", ".wav");
        assert!(name.starts_with("yt1-"));
        assert!(name.ends_with(".wav"));
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let manager = CaptureManager::new("true", "default");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        manager.start(&path).await.unwrap();
        let second = manager.start(&dir.path().join("b.wav")).await;
        assert!(matches!(second, Err(Error::AlreadyCapturing)));
        let _ = manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_invalid_state() {
        let manager = CaptureManager::new("true", "default");
        let result = manager.stop().await;
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }
}
