//! Scripted transport for exercising the executor without a network or conda.

use super::{ExecOutput, Transport};
use crate::error::Result;
use std::cell::RefCell;

type Responder = Box<dyn Fn(&str) -> ExecOutput>;

/// Answers every script with the responder's output and records it.
pub struct MockTransport {
    responder: Responder,
    scripts: RefCell<Vec<String>>,
}

impl MockTransport {
    pub fn new(responder: impl Fn(&str) -> ExecOutput + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            scripts: RefCell::new(Vec::new()),
        }
    }

    /// Every script succeeds with empty output.
    pub fn succeeding() -> Self {
        Self::new(|_| ExecOutput::ok(""))
    }

    /// Scripts executed so far, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.borrow().clone()
    }

    /// Number of executed scripts containing `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.scripts
            .borrow()
            .iter()
            .filter(|s| s.contains(needle))
            .count()
    }
}

impl Transport for MockTransport {
    fn exec(&self, script: &str) -> Result<ExecOutput> {
        self.scripts.borrow_mut().push(script.to_string());
        Ok((self.responder)(script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_scripts() {
        let t = MockTransport::succeeding();
        t.exec("echo a").unwrap();
        t.exec("echo b").unwrap();
        assert_eq!(t.scripts(), vec!["echo a", "echo b"]);
        assert_eq!(t.count_containing("echo"), 2);
    }

    #[test]
    fn test_mock_responder() {
        let t = MockTransport::new(|s| {
            if s.contains("wget") {
                ExecOutput::failed(4, "network unreachable")
            } else {
                ExecOutput::ok("fine")
            }
        });
        assert_eq!(t.exec("wget x").unwrap().exit_code, 4);
        assert!(t.exec("echo").unwrap().success());
    }
}
