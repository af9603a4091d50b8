//! Phase-named script building on top of `RemoteTask`.

use convoy_remote::RemoteTask;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle phase a script belongs to. Used in task summaries and log
/// lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Installing,
    Customizing,
    Launching,
    CheckRunning,
    Stopping,
    Killing,
    Restarting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Installing => "installing",
            Phase::Customizing => "customizing",
            Phase::Launching => "launching",
            Phase::CheckRunning => "check-running",
            Phase::Stopping => "stopping",
            Phase::Killing => "killing",
            Phase::Restarting => "restarting",
        };
        write!(f, "{s}")
    }
}

/// Builds the `RemoteTask` for one lifecycle phase of one resource.
pub struct ScriptBuilder {
    phase: Phase,
    resource: String,
    body: Vec<String>,
    env: BTreeMap<String, String>,
    tolerate_non_zero: bool,
    use_pid_file: Option<String>,
    run_as_privileged: bool,
    mutex: Option<String>,
}

impl ScriptBuilder {
    pub fn new(phase: Phase, resource: impl Into<String>) -> Self {
        Self {
            phase,
            resource: resource.into(),
            body: Vec::new(),
            env: BTreeMap::new(),
            tolerate_non_zero: false,
            use_pid_file: None,
            run_as_privileged: false,
            mutex: None,
        }
    }

    pub fn body(mut self, command: impl Into<String>) -> Self {
        self.body.push(command.into());
        self
    }

    pub fn append(mut self, commands: impl IntoIterator<Item = String>) -> Self {
        self.body.extend(commands);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn tolerate_non_zero(mut self) -> Self {
        self.tolerate_non_zero = true;
        self
    }

    pub fn use_pid_file(mut self, path: impl Into<String>) -> Self {
        self.use_pid_file = Some(path.into());
        self
    }

    pub fn run_as_privileged(mut self, privileged: bool) -> Self {
        self.run_as_privileged = privileged;
        self
    }

    pub fn mutex(mut self, name: impl Into<String>) -> Self {
        self.mutex = Some(name.into());
        self
    }

    pub fn build(self) -> RemoteTask {
        let mut task = RemoteTask::new(format!("{} {}", self.phase, self.resource))
            .commands(self.body)
            .envs(self.env);
        if self.tolerate_non_zero {
            task = task.tolerate_non_zero();
        }
        if let Some(path) = self.use_pid_file {
            task = task.use_pid_file(path);
        }
        if self.run_as_privileged {
            task = task.run_as_privileged();
        }
        if let Some(name) = self.mutex {
            task = task.mutex(name);
        }
        task
    }
}
