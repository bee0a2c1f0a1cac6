//! Session controller
//!
//! Ties one output pane to one process session: runs code in a language,
//! keeps the pane's history in an `OutputBuffer`, and rejects a new run
//! while one is live.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::buffer::OutputBuffer;
use crate::core::command::resolve_template;
use crate::core::record::{ExecutionOutcome, OutputRecord};
use crate::core::session::{ProcessSession, SessionError, SessionSink, SessionState};
use crate::language::Language;
use crate::scratch::{ScriptFile, DEFAULT_STEM};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("A script is already running; stop it first")]
    AlreadyRunning,

    #[error("Failed to write script file: {0}")]
    ScriptFile(#[source] std::io::Error),
}

impl From<SessionError> for ControllerError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::AlreadyRunning => ControllerError::AlreadyRunning,
        }
    }
}

/// Sink that records into the pane buffer and owns the script file
struct PaneSink {
    buffer: Arc<OutputBuffer>,
    inner: Arc<dyn SessionSink>,
    script: Mutex<Option<ScriptFile>>,
}

impl SessionSink for PaneSink {
    fn on_record(&self, record: OutputRecord) {
        self.buffer.append(record.clone());
        self.inner.on_record(record);
    }

    fn on_outcome(&self, outcome: ExecutionOutcome) {
        let script = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(script) = script {
            debug!("Removing script file {}", script.path().display());
            drop(script);
        }
        self.inner.on_outcome(outcome);
    }
}

/// Drives runs for one output pane
pub struct SessionController {
    session: ProcessSession,
    buffer: Arc<OutputBuffer>,
    scratch_dir: PathBuf,
    /// Stem for script file names, usually the open file's name
    script_stem: String,
}

impl SessionController {
    pub fn new(session: ProcessSession, buffer: Arc<OutputBuffer>, scratch_dir: PathBuf) -> Self {
        Self {
            session,
            buffer,
            scratch_dir,
            script_stem: DEFAULT_STEM.to_string(),
        }
    }

    /// Name scratch files after `stem` instead of "untitled"
    pub fn set_script_stem(&mut self, stem: &str) {
        self.script_stem = stem.to_string();
    }

    /// Run `code` with `language`. Returns the run id.
    ///
    /// Clears the pane first. Output goes to the pane buffer and then to
    /// `sink`.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` while a run is live; `ScriptFile` if the script
    /// could not be written (also reported to the pane as an error line).
    pub fn run(
        &self,
        language: &Language,
        code: &str,
        sink: Arc<dyn SessionSink>,
    ) -> Result<u64, ControllerError> {
        if self.session.is_running() {
            return Err(ControllerError::AlreadyRunning);
        }
        self.buffer.clear();

        let script = match ScriptFile::create(
            &self.scratch_dir,
            &self.script_stem,
            &language.extension,
            code,
        ) {
            Ok(script) => script,
            Err(e) => {
                warn!("Failed to write script for {}: {}", language.name, e);
                let record = OutputRecord::stderr(format!("Failed to start: {}", e));
                self.buffer.append(record.clone());
                sink.on_record(record);
                return Err(ControllerError::ScriptFile(e));
            }
        };

        let command = resolve_template(&language.run_command, script.path());
        let working_dir = script.dir().to_path_buf();
        info!("Running {} script: {}", language.name, command);

        let pane_sink = Arc::new(PaneSink {
            buffer: Arc::clone(&self.buffer),
            inner: sink,
            script: Mutex::new(Some(script)),
        });
        Ok(self.session.start(&command, &working_dir, pane_sink)?)
    }

    pub fn stop(&self) {
        self.session.stop();
    }

    /// Forward a line of input. Empty input is ignored.
    pub fn send_input(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.session.send_input(text);
    }

    pub fn clear(&self) {
        self.buffer.clear();
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn buffer(&self) -> &Arc<OutputBuffer> {
        &self.buffer
    }
}
