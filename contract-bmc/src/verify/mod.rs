//! Contract verification pipeline
//!
//! Translates a file, builds it once, runs the model checker on every
//! catalogued target and collects the verdicts into a [`VerificationReport`].

pub mod staging;

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ast::LineIndex;
use crate::catalog::{Behavior, FunctionCatalog, VerificationTarget};
use crate::config::Settings;
use crate::emit::{self, Emitted};
use crate::encode::{CProverPrimitives, EncodedProgram, Encoder};
use crate::error::Result;
use crate::runner::{Controller, Interrupt, RunOutcome, RunRequest};
use crate::verdict::{self, CounterexampleTrace, Status};
use crate::{lexer, parser, preprocessor};

use staging::{ArtifactBuilder, JavacBuilder, Staging};

/// A file translated and catalogued, ready to be verified
#[derive(Debug)]
pub struct Translation {
    /// Source after JML normalisation; spans refer to this text
    pub preprocessed: String,
    pub encoded: EncodedProgram,
    pub emitted: Emitted,
    pub targets: Vec<VerificationTarget>,
}

impl Translation {
    /// Translates `source` end to end. Per-method translation failures are
    /// recorded in `encoded`; only whole-file front-end errors are returned.
    pub fn new(filename: &str, source: &str) -> Result<Self> {
        let preprocessed = preprocessor::preprocess(source)?;
        let tokens = lexer::tokenize(&preprocessed)?;
        let program = parser::parse(filename, &preprocessed, tokens)?;

        let targets = FunctionCatalog::new(&program).targets(&preprocessed);
        let primitives = CProverPrimitives;
        let encoded = Encoder::new(&primitives).encode_program(&program);
        let emitted = emit::emit(&encoded.program, &preprocessed);
        debug!(
            file = filename,
            targets = targets.len(),
            failures = encoded.failures().count(),
            "translated"
        );

        Ok(Self {
            preprocessed,
            encoded,
            emitted,
            targets,
        })
    }

    /// Targets whose descriptor names `method`; all targets without a filter
    pub fn select(&self, method: Option<&str>) -> Vec<VerificationTarget> {
        self.targets
            .iter()
            .filter(|t| method.is_none_or(|m| t.matches_filter(m)))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetStatus {
    Success,
    Failed,
    Error,
    TimedOut,
    Ignored,
    Cancelled,
}

impl From<Status> for TargetStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Success => TargetStatus::Success,
            Status::Failed => TargetStatus::Failed,
            Status::Error => TargetStatus::Error,
        }
    }
}

/// Outcome of one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub descriptor: String,
    pub behavior: Behavior,
    pub unwind: u32,
    pub status: TargetStatus,
    pub traces: Vec<CounterexampleTrace>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub elapsed_ms: Option<u64>,
}

impl TargetReport {
    fn new(target: &VerificationTarget, unwind: u32, status: TargetStatus) -> Self {
        Self {
            descriptor: target.descriptor.clone(),
            behavior: target.behavior,
            unwind,
            status,
            traces: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            elapsed_ms: None,
        }
    }

    /// Whether the status is what the method's annotation declares
    pub fn matches_expectation(&self) -> bool {
        match self.behavior {
            Behavior::Verify => self.status == TargetStatus::Success,
            Behavior::Fails => self.status == TargetStatus::Failed,
            Behavior::Ignored => self.status == TargetStatus::Ignored,
        }
    }

    fn record_elapsed(&mut self, elapsed: Duration) {
        self.elapsed_ms = Some(elapsed.as_millis() as u64);
    }
}

impl std::fmt::Display for TargetReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = &self.descriptor;
        match self.status {
            TargetStatus::Success => write!(f, "✓ {name}: verified")?,
            TargetStatus::Failed => write!(f, "✗ {name}: verification failed")?,
            TargetStatus::Error => write!(f, "! {name}: error")?,
            TargetStatus::TimedOut => write!(f, "? {name}: timed out")?,
            TargetStatus::Ignored => write!(f, "- {name}: ignored")?,
            TargetStatus::Cancelled => write!(f, "- {name}: cancelled")?,
        }
        if let Some(ms) = self.elapsed_ms {
            write!(f, " ({ms} ms)")?;
        }
        if self.behavior != Behavior::Ignored && !self.matches_expectation() {
            write!(f, " [expected {}]", self.behavior)?;
        }
        writeln!(f)?;

        for trace in &self.traces {
            write!(f, "  {trace}")?;
        }
        for error in &self.errors {
            writeln!(f, "  {error}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "⚠ {name}: {warning}")?;
        }
        Ok(())
    }
}

/// Report for every target of one file
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub targets: Vec<TargetReport>,
}

impl VerificationReport {
    /// Every target that ran was verified
    pub fn all_verified(&self) -> bool {
        self.targets
            .iter()
            .all(|t| matches!(t.status, TargetStatus::Success | TargetStatus::Ignored))
    }

    pub fn all_match_expectations(&self) -> bool {
        self.targets.iter().all(TargetReport::matches_expectation)
    }

    pub fn count(&self, status: TargetStatus) -> usize {
        self.targets.iter().filter(|t| t.status == status).count()
    }
}

impl std::fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for target in &self.targets {
            write!(f, "{target}")?;
        }

        writeln!(f)?;
        let run = self.targets.len() - self.count(TargetStatus::Ignored);
        if self.all_verified() {
            writeln!(f, "All {run} target(s) verified successfully.")?;
        } else {
            writeln!(
                f,
                "Verified: {}/{run}, Failed: {}, Errors: {}, Timed out: {}",
                self.count(TargetStatus::Success),
                self.count(TargetStatus::Failed),
                self.count(TargetStatus::Error),
                self.count(TargetStatus::TimedOut),
            )?;
        }
        Ok(())
    }
}

/// Runs the model checker over a translation
pub struct Verifier {
    settings: Settings,
    echo_output: bool,
    interrupt: Option<Interrupt>,
}

impl Verifier {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            echo_output: false,
            interrupt: None,
        }
    }

    /// Log raw backend output of every run
    pub fn with_echo_output(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }

    /// Stop building and running once `interrupt` is raised
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(Interrupt::is_set)
    }

    async fn cancelled(&self) {
        match &self.interrupt {
            Some(interrupt) => interrupt.triggered().await,
            None => std::future::pending().await,
        }
    }

    /// Verifies `targets` of `translation`, compiling with javac
    pub async fn verify(
        &self,
        input: &Path,
        translation: &Translation,
        targets: &[VerificationTarget],
    ) -> Result<VerificationReport> {
        let builder = JavacBuilder::new(&self.settings.compiler).with_classpath(self.settings.classpath.clone());
        self.verify_with(input, translation, targets, &builder).await
    }

    /// Verifies `targets` of `translation` with a custom artifact builder
    pub async fn verify_with<B: ArtifactBuilder>(
        &self,
        input: &Path,
        translation: &Translation,
        targets: &[VerificationTarget],
        builder: &B,
    ) -> Result<VerificationReport> {
        let mut reports = Vec::with_capacity(targets.len());
        let mut runnable = Vec::new();

        for target in targets {
            let unwind = self.settings.effective_unwind(target.unwind);
            let outcome = translation.encoded.outcome(target.span);
            let mut report = TargetReport::new(target, unwind, TargetStatus::Ignored);
            if let Some(outcome) = outcome {
                report.warnings = outcome.warnings.clone();
            }

            if target.behavior == Behavior::Ignored {
                debug!(descriptor = %target.descriptor, "ignored");
            } else if let Some(error) = outcome.and_then(|o| o.error.as_ref()) {
                let index = LineIndex::new(&translation.preprocessed);
                let line = error.span().and_then(|s| index.span_line(s));
                report.status = TargetStatus::Error;
                report.errors.push(match line {
                    Some(line) => format!("line {line}: {}", error.message()),
                    None => error.message().to_string(),
                });
            } else {
                runnable.push((reports.len(), RunRequest {
                    descriptor: target.descriptor.clone(),
                    unwind,
                }));
            }
            reports.push(report);
        }

        if runnable.is_empty() {
            return Ok(VerificationReport { targets: reports });
        }
        if self.interrupted() {
            cancel_all(&mut reports, &runnable);
            return Ok(VerificationReport { targets: reports });
        }

        let staging = Staging::create(input, self.settings.keep_translation)?;
        let file_name = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Main.java".to_string());
        let java = staging.write_translation(&file_name, &translation.emitted)?;
        staging.write_runtime_stub()?;

        let cancel = self.cancelled();
        tokio::pin!(cancel);
        let built = tokio::select! {
            built = builder.build(staging.path(), &java) => built,
            _ = &mut cancel => {
                warn!("interrupted while building the translation");
                cancel_all(&mut reports, &runnable);
                return Ok(VerificationReport { targets: reports });
            }
        };
        let artifact = match built {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(error = %e, "translation did not build");
                for (index, _) in &runnable {
                    reports[*index].status = TargetStatus::Error;
                    reports[*index].errors.push(e.to_string());
                }
                return Ok(VerificationReport { targets: reports });
            }
        };

        let controller = Controller::new(&self.settings.backend, artifact, staging.path())
            .with_timeout(self.settings.timeout())
            .with_extra_args(self.settings.extra_backend_args())
            .with_echo_output(self.echo_output);
        info!(count = runnable.len(), "running backend");

        let requests: Vec<RunRequest> = runnable.iter().map(|(_, r)| r.clone()).collect();
        let outcomes = controller.run_all_until(&requests, cancel.as_mut()).await;

        for ((index, _), outcome) in runnable.iter().zip(outcomes) {
            let report = &mut reports[*index];
            match outcome {
                RunOutcome::Completed(output) => {
                    let verdict =
                        verdict::interpret(&output.stdout, output.exit_code, &translation.emitted.metadata);
                    report.status = verdict.status.into();
                    report.traces = verdict.traces;
                    report.errors.extend(verdict.errors);
                    report.record_elapsed(output.elapsed);
                }
                RunOutcome::TimedOut { elapsed } => {
                    report.status = TargetStatus::TimedOut;
                    report.record_elapsed(elapsed);
                }
                RunOutcome::Crashed(e) => {
                    report.status = TargetStatus::Error;
                    report.errors.push(e.to_string());
                }
                RunOutcome::Cancelled => report.status = TargetStatus::Cancelled,
            }
        }

        Ok(VerificationReport { targets: reports })
    }
}

fn cancel_all(reports: &mut [TargetReport], runnable: &[(usize, RunRequest)]) {
    for (index, _) in runnable {
        reports[*index].status = TargetStatus::Cancelled;
    }
}
