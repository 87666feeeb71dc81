//! Scripted in-memory remote host.
//!
//! `MockShell` records every call and answers from preset reply queues:
//! one queue shared by `exec` and `exec_with_input`, one for transfers. An
//! exhausted queue answers with empty successful output. Clones share state,
//! so a test keeps one handle while the session owns another.
//! `MockConnector` hands out clones of one shell and counts connections.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::rig::config::RemoteConfig;
use crate::rig::connection::{Connector, RemoteOutput, RemoteShell};


/// A preset answer. `Err` carries the reason of a `Connection` error.
pub type MockReply = std::result::Result<RemoteOutput, String>;

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Exec(String),
    ExecWithInput { command: String, input: String },
    Transfer(Vec<String>),
}

#[derive(Debug, Default)]
struct MockState {
    exec_replies: VecDeque<MockReply>,
    transfer_replies: VecDeque<MockReply>,
    calls: Vec<MockCall>,
}

/// Test-double `RemoteShell`.
#[derive(Debug, Clone)]
pub struct MockShell {
    config: RemoteConfig,
    state: Arc<Mutex<MockState>>,
}

impl MockShell {
    pub fn new(config: RemoteConfig) -> Self {
        MockShell {
            config,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Queue replies for `exec`/`exec_with_input`, answered in order.
    pub fn with_exec_replies(self, replies: Vec<MockReply>) -> Self {
        self.state.lock().exec_replies.extend(replies);
        self
    }

    pub fn push_exec_reply(&self, reply: MockReply) {
        self.state.lock().exec_replies.push_back(reply);
    }

    pub fn push_transfer_reply(&self, reply: MockReply) {
        self.state.lock().transfer_replies.push_back(reply);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Commands passed to `exec`/`exec_with_input`, in order.
    pub fn executed_commands(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Exec(cmd) => Some(cmd.clone()),
                MockCall::ExecWithInput { command, .. } => Some(command.clone()),
                MockCall::Transfer(_) => None,
            })
            .collect()
    }

    /// Argument vectors passed to `transfer`, in order.
    pub fn transfers(&self) -> Vec<Vec<String>> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Transfer(args) => Some(args.clone()),
                _ => None,
            })
            .collect()
    }

    fn answer(&self, reply: Option<MockReply>) -> Result<RemoteOutput> {
        match reply {
            Some(Ok(output)) => Ok(output),
            Some(Err(reason)) => Err(Error::Connection {
                host: self.config.host.clone(),
                reason,
            }),
            None => Ok(RemoteOutput::ok("")),
        }
    }
}

impl RemoteShell for MockShell {
    fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn exec(&self, command: &str) -> Result<RemoteOutput> {
        let reply = {
            let mut state = self.state.lock();
            state.calls.push(MockCall::Exec(command.to_string()));
            state.exec_replies.pop_front()
        };
        self.answer(reply)
    }

    fn exec_with_input(&self, command: &str, input: &[u8]) -> Result<RemoteOutput> {
        let reply = {
            let mut state = self.state.lock();
            state.calls.push(MockCall::ExecWithInput {
                command: command.to_string(),
                input: String::from_utf8_lossy(input).into_owned(),
            });
            state.exec_replies.pop_front()
        };
        self.answer(reply)
    }

    fn transfer(&self, args: &[String]) -> Result<RemoteOutput> {
        let reply = {
            let mut state = self.state.lock();
            state.calls.push(MockCall::Transfer(args.to_vec()));
            state.transfer_replies.pop_front()
        };
        self.answer(reply)
    }
}


/// Test-double `Connector` returning clones of one `MockShell`.
#[derive(Debug)]
pub struct MockConnector {
    shell: MockShell,
    refuse: Option<String>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(shell: MockShell) -> Self {
        MockConnector {
            shell,
            refuse: None,
            connects: AtomicUsize::new(0),
        }
    }

    /// A connector whose every `connect` fails with `reason`.
    pub fn refusing(shell: MockShell, reason: &str) -> Self {
        MockConnector {
            shell,
            refuse: Some(reason.to_string()),
            connects: AtomicUsize::new(0),
        }
    }

    /// Number of `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(&self, config: &RemoteConfig) -> Result<Box<dyn RemoteShell>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(ref reason) = self.refuse {
            return Err(Error::Connection {
                host: config.host.clone(),
                reason: reason.clone(),
            });
        }
        let mut shell = self.shell.clone();
        shell.config = config.clone();
        Ok(Box::new(shell))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> MockShell {
        MockShell::new(RemoteConfig::new("hpc", "alice"))
    }

    #[test]
    fn replies_in_order_then_empty() {
        let shell = shell().with_exec_replies(vec![
            Ok(RemoteOutput::ok("first\n")),
            Ok(RemoteOutput::err("second\n")),
        ]);
        assert_eq!(shell.exec("a").unwrap().stdout, "first\n");
        assert_eq!(shell.exec_with_input("b", b"x").unwrap().stderr, "second\n");
        assert_eq!(shell.exec("c").unwrap(), RemoteOutput::ok(""));
        assert_eq!(shell.executed_commands(), vec!["a", "b", "c"]);
    }

    #[test]
    fn records_input_and_transfers() {
        let shell = shell();
        shell.exec_with_input("cat > f", b"body\n").unwrap();
        shell.transfer(&["-rtz".to_string(), "src".to_string()]).unwrap();
        assert_eq!(
            shell.calls(),
            vec![
                MockCall::ExecWithInput {
                    command: "cat > f".into(),
                    input: "body\n".into()
                },
                MockCall::Transfer(vec!["-rtz".into(), "src".into()]),
            ]
        );
        assert_eq!(shell.transfers().len(), 1);
    }

    #[test]
    fn error_reply_is_connection_error() {
        let shell = shell().with_exec_replies(vec![Err("broken pipe".into())]);
        assert!(matches!(shell.exec("x"), Err(Error::Connection { .. })));
    }

    #[test]
    fn clones_share_state() {
        let a = shell();
        let b = a.clone();
        b.exec("one").unwrap();
        assert_eq!(a.executed_commands(), vec!["one"]);
    }

    #[test]
    fn connector_counts_and_refuses() {
        let config = RemoteConfig::new("hpc", "alice");
        let connector = MockConnector::new(shell());
        assert!(connector.connect(&config).is_ok());
        assert_eq!(connector.connect_count(), 1);

        let refusing = MockConnector::refusing(shell(), "Permission denied (publickey)");
        match refusing.connect(&config) {
            Err(Error::Connection { reason, .. }) => assert!(reason.contains("publickey")),
            _ => panic!("expected connection error"),
        }
    }
}
