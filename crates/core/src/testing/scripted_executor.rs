//! Shell-script helpers for exercising harvester executors.

use std::path::PathBuf;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Writes small shell scripts usable as harvester `exec` templates.
///
/// A succeeding script appends one `base=` line plus the file-list
/// contents to `<name>.log` per invocation, so tests can count executor
/// runs (forward and undo both leave a line).
pub struct ScriptedExecutor {
    dir: PathBuf,
}

impl ScriptedExecutor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write_script(&self, name: &str, body: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.join(format!("{}.sh", name));
        std::fs::write(&path, body)?;
        #[cfg(unix)]
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    /// An exec template that succeeds and records each invocation.
    pub fn succeeding(&self, name: &str) -> std::io::Result<String> {
        let log = self.dir.join(format!("{}.log", name));
        let body = format!(
            "#!/bin/sh\necho \"base=$1\" >> \"{log}\"\nif [ -f \"$2\" ]; then cat \"$2\" >> \"{log}\"; fi\n",
            log = log.display()
        );
        let script = self.write_script(name, &body)?;
        Ok(format!(
            "sh {} {{base}} {{file_list}} {{log_dir}}",
            script.display()
        ))
    }

    /// An exec template that prints `message` to stderr and exits non-zero.
    pub fn failing(&self, name: &str, message: &str) -> std::io::Result<String> {
        let body = format!("#!/bin/sh\necho \"{}\" >&2\nexit 1\n", message);
        let script = self.write_script(name, &body)?;
        Ok(format!(
            "sh {} {{base}} {{file_list}} {{log_dir}}",
            script.display()
        ))
    }

    /// An exec template that fails on its first invocation and succeeds
    /// afterwards. Undo re-runs the same harvester, so a permanently
    /// failing script would make compensation fail too.
    pub fn failing_once(&self, name: &str, message: &str) -> std::io::Result<String> {
        let marker = self.dir.join(format!("{}.failed", name));
        let log = self.dir.join(format!("{}.log", name));
        let body = format!(
            "#!/bin/sh\necho \"base=$1\" >> \"{log}\"\nif [ ! -f \"{marker}\" ]; then\n  touch \"{marker}\"\n  echo \"{message}\" >&2\n  exit 1\nfi\n",
            log = log.display(),
            marker = marker.display(),
            message = message
        );
        let script = self.write_script(name, &body)?;
        Ok(format!(
            "sh {} {{base}} {{file_list}} {{log_dir}}",
            script.display()
        ))
    }

    /// How many times the named script has run.
    pub fn invocation_count(&self, name: &str) -> usize {
        let log = self.dir.join(format!("{}.log", name));
        match std::fs::read_to_string(log) {
            Ok(contents) => contents.lines().filter(|l| l.starts_with("base=")).count(),
            Err(_) => 0,
        }
    }
}
