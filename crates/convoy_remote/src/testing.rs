//! Recording mock transport for tests.

use crate::transport::{ExecOutput, ExecTransport};
use crate::ExecError;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

struct Rule {
    pattern: String,
    outputs: VecDeque<ExecOutput>,
}

/// A file copied through the mock.
#[derive(Debug, Clone)]
pub struct CopiedFile {
    pub remote_path: String,
    pub bytes: Vec<u8>,
    pub mode: Option<String>,
}

/// Transport that records every script and copy, and answers scripts by
/// substring-matching configured rules. Unmatched scripts succeed with
/// empty output.
pub struct MockTransport {
    host: String,
    fail_transport: bool,
    rules: Mutex<Vec<Rule>>,
    executed: Mutex<Vec<String>>,
    copies: Mutex<Vec<CopiedFile>>,
}

impl MockTransport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            fail_transport: false,
            rules: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            copies: Mutex::new(Vec::new()),
        }
    }

    /// Scripts containing `pattern` answer with `output` (repeatedly).
    pub fn on(self, pattern: impl Into<String>, output: ExecOutput) -> Self {
        self.on_seq(pattern, vec![output])
    }

    /// Scripts containing `pattern` answer with the given outputs in
    /// order; the last one repeats once the queue is down to one entry.
    pub fn on_seq(mut self, pattern: impl Into<String>, outputs: Vec<ExecOutput>) -> Self {
        self.rules.get_mut().unwrap().push(Rule {
            pattern: pattern.into(),
            outputs: outputs.into(),
        });
        self
    }

    /// Every call fails with a transport error.
    pub fn fail_transport(mut self) -> Self {
        self.fail_transport = true;
        self
    }

    /// Scripts executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn exec_count(&self) -> usize {
        self.executed.lock().unwrap().len()
    }

    /// Files copied so far, in order.
    pub fn copies(&self) -> Vec<CopiedFile> {
        self.copies.lock().unwrap().clone()
    }

    pub fn copy_count(&self) -> usize {
        self.copies.lock().unwrap().len()
    }
}

#[async_trait]
impl ExecTransport for MockTransport {
    fn host(&self) -> &str {
        &self.host
    }

    async fn exec(
        &self,
        script: &str,
        _env: &BTreeMap<String, String>,
    ) -> Result<ExecOutput, ExecError> {
        if self.fail_transport {
            return Err(ExecError::Transport {
                host: self.host.clone(),
                message: "connection refused".to_string(),
            });
        }
        self.executed.lock().unwrap().push(script.to_string());

        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if script.contains(&rule.pattern) {
                let output = if rule.outputs.len() > 1 {
                    rule.outputs.pop_front()
                } else {
                    rule.outputs.front().cloned()
                };
                if let Some(output) = output {
                    return Ok(output);
                }
            }
        }
        Ok(ExecOutput::ok(""))
    }

    async fn copy_to(
        &self,
        bytes: &[u8],
        remote_path: &str,
        mode: Option<&str>,
    ) -> Result<(), ExecError> {
        if self.fail_transport {
            return Err(ExecError::Transport {
                host: self.host.clone(),
                message: "connection refused".to_string(),
            });
        }
        self.copies.lock().unwrap().push(CopiedFile {
            remote_path: remote_path.to_string(),
            bytes: bytes.to_vec(),
            mode: mode.map(str::to_string),
        });
        Ok(())
    }
}
