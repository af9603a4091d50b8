//! Task definition - an immutable batch of shell commands.

use std::collections::BTreeMap;

/// An ordered sequence of shell commands with an environment mapping and
/// execution flags. Built with the builder methods and then consumed by
/// [`crate::TaskExecutor::execute`]; immutable once submitted.
#[derive(Debug, Clone)]
pub struct RemoteTask {
    pub(crate) summary: String,
    pub(crate) commands: Vec<String>,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) tolerate_non_zero: bool,
    pub(crate) use_pid_file: Option<String>,
    pub(crate) run_as_privileged: bool,
    pub(crate) mutex: Option<String>,
}

impl RemoteTask {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            env: BTreeMap::new(),
            tolerate_non_zero: false,
            use_pid_file: None,
            run_as_privileged: false,
            mutex: None,
        }
    }

    /// Appends one command to the batch.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Appends several commands to the batch.
    pub fn commands(mut self, commands: impl IntoIterator<Item = String>) -> Self {
        self.commands.extend(commands);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, envs: BTreeMap<String, String>) -> Self {
        self.env.extend(envs);
        self
    }

    /// A non-zero exit code becomes part of the result instead of an error.
    pub fn tolerate_non_zero(mut self) -> Self {
        self.tolerate_non_zero = true;
        self
    }

    /// After the batch ran, the executor reads and validates a pid from the
    /// given remote file.
    pub fn use_pid_file(mut self, path: impl Into<String>) -> Self {
        self.use_pid_file = Some(path.into());
        self
    }

    /// Runs the whole batch under `sudo`.
    pub fn run_as_privileged(mut self) -> Self {
        self.run_as_privileged = true;
        self
    }

    /// Acquires the named host-scoped mutex for the duration of the batch.
    pub fn mutex(mut self, name: impl Into<String>) -> Self {
        self.mutex = Some(name.into());
        self
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Renders the batch as one shell script. The batch aborts at the
    /// first failing command and reports its exit code.
    pub(crate) fn render_script(&self) -> String {
        let mut script = String::from("set -e\n");
        script.push_str(&self.commands.join("\n"));
        script
    }
}

/// Quotes a string for safe interpolation into a shell command line.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_script_joins_commands() {
        let task = RemoteTask::new("install demo")
            .command("mkdir -p /opt/demo")
            .command("touch /opt/demo/ok");

        assert_eq!(
            task.render_script(),
            "set -e\nmkdir -p /opt/demo\ntouch /opt/demo/ok"
        );
    }

    #[test]
    fn test_builder_flags() {
        let task = RemoteTask::new("launch demo")
            .command("./run.sh")
            .env("PORT", "8080")
            .tolerate_non_zero()
            .use_pid_file("/run/demo.pid")
            .mutex("install:demo");

        assert!(task.tolerate_non_zero);
        assert_eq!(task.use_pid_file.as_deref(), Some("/run/demo.pid"));
        assert_eq!(task.mutex.as_deref(), Some("install:demo"));
        assert_eq!(task.env.get("PORT").map(String::as_str), Some("8080"));
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
