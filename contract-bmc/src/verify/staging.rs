//! Staging directory and artifact build
//!
//! The translation, its trace metadata and the runtime stub are written into
//! a temporary directory next to the input file. The directory is removed on
//! drop, whichever way the run ends, unless it is kept for inspection.
//! The compiler runs as a child that is killed when its future is dropped,
//! so an interrupted build does not outlive the directory.

use std::future::Future;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::emit::Emitted;
use crate::runner::BackendError;

/// Compile-time stand-in for the model checker's runtime library; the
/// backend substitutes its own models for these methods
const CPROVER_STUB: &str = "\
package org.cprover;

public final class CProver {
    public static boolean nondetBoolean() { return false; }
    public static byte nondetByte() { return 0; }
    public static short nondetShort() { return 0; }
    public static char nondetChar() { return '\\0'; }
    public static int nondetInt() { return 0; }
    public static long nondetLong() { return 0L; }
    public static float nondetFloat() { return 0.0f; }
    public static double nondetDouble() { return 0.0; }

    public static void assume(boolean condition) {
        if (!condition) {
            throw new RuntimeException(\"assumption violated\");
        }
    }
}
";

/// Scoped working directory of one verification run
#[derive(Debug)]
pub struct Staging {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl Staging {
    /// Creates a hidden directory beside `input`
    pub fn create(input: &Path, keep: bool) -> std::io::Result<Self> {
        let parent = match input.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let dir = tempfile::Builder::new()
            .prefix(".contract-bmc-")
            .tempdir_in(parent)?;
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "created staging directory");
        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the translation as `file_name` plus its metadata as
    /// `<stem>.trace.json`; returns the path of the Java file
    pub fn write_translation(&self, file_name: &str, emitted: &Emitted) -> std::io::Result<PathBuf> {
        let java = self.path.join(file_name);
        std::fs::write(&java, &emitted.source)?;

        let json = emitted.metadata.to_json().map_err(std::io::Error::other)?;
        std::fs::write(java.with_extension("trace.json"), json)?;
        Ok(java)
    }

    /// Places the `org.cprover.CProver` stub where the compiler finds it
    pub fn write_runtime_stub(&self) -> std::io::Result<()> {
        let dir = self.path.join("org").join("cprover");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("CProver.java"), CPROVER_STUB)
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if self.keep {
            let path = dir.keep();
            info!(path = %path.display(), "kept translation");
        } else if let Err(e) = dir.close() {
            warn!(path = %self.path.display(), error = %e, "failed to remove staging directory");
        }
    }
}

/// Produces the artifact the backend runs on
pub trait ArtifactBuilder {
    /// Compiles `source` inside `dir`; returns the artifact path relative to
    /// `dir`. Dropping the future must stop any process it started.
    fn build(&self, dir: &Path, source: &Path) -> impl Future<Output = Result<String, BackendError>> + Send;
}

/// Builds class files with `javac`
#[derive(Debug, Clone)]
pub struct JavacBuilder {
    compiler: PathBuf,
    classpath: Vec<PathBuf>,
}

impl JavacBuilder {
    pub fn new(compiler: impl Into<PathBuf>) -> Self {
        Self {
            compiler: compiler.into(),
            classpath: Vec::new(),
        }
    }

    pub fn with_classpath(mut self, classpath: Vec<PathBuf>) -> Self {
        self.classpath = classpath;
        self
    }

    fn classpath_arg(&self, dir: &Path) -> std::ffi::OsString {
        let separator = if cfg!(windows) { ";" } else { ":" };
        let mut arg = dir.as_os_str().to_os_string();
        for entry in &self.classpath {
            arg.push(separator);
            arg.push(entry.as_os_str());
        }
        arg
    }
}

impl ArtifactBuilder for JavacBuilder {
    async fn build(&self, dir: &Path, source: &Path) -> Result<String, BackendError> {
        let output = Command::new(&self.compiler)
            .arg("-g")
            .arg("-cp")
            .arg(self.classpath_arg(dir))
            .arg(source)
            .current_dir(dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| BackendError::Spawn {
                program: self.compiler.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
            log.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(BackendError::Build(log.trim().to_string()));
        }

        let class_file = source
            .with_extension("class")
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| BackendError::Build(format!("no class file for {}", source.display())))?;
        debug!(artifact = %class_file, "compiled translation");
        Ok(class_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::TraceMetadata;

    fn emitted() -> Emitted {
        Emitted {
            source: "class T {}\n".into(),
            metadata: TraceMetadata::default(),
        }
    }

    #[test]
    fn test_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let input = base.path().join("T.java");
        let path = {
            let staging = Staging::create(&input, false).unwrap();
            let java = staging.write_translation("T.java", &emitted()).unwrap();
            assert!(java.exists());
            assert!(staging.path().join("T.trace.json").exists());
            staging.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_kept_when_requested() {
        let base = tempfile::tempdir().unwrap();
        let input = base.path().join("T.java");
        let path = {
            let staging = Staging::create(&input, true).unwrap();
            staging.write_runtime_stub().unwrap();
            staging.path().to_path_buf()
        };
        assert!(path.join("org/cprover/CProver.java").exists());
        assert!(path.starts_with(base.path()));
    }

    #[tokio::test]
    async fn test_missing_compiler_is_spawn_error() {
        let base = tempfile::tempdir().unwrap();
        let builder = JavacBuilder::new(base.path().join("no-javac"));
        let err = builder.build(base.path(), Path::new("T.java")).await.unwrap_err();
        assert!(matches!(err, BackendError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_compiler_failure_is_build_error() {
        let base = tempfile::tempdir().unwrap();
        // `false` ignores the javac flags and exits non-zero
        let builder = JavacBuilder::new("false");
        let err = builder.build(base.path(), Path::new("Bad.java")).await;
        assert!(matches!(err, Err(BackendError::Build(_))));
    }
}
