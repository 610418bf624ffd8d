//! Core types for container lifecycle management.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DaemonError;

/// Exit code recorded for a container that was running when the daemon
/// died: 128 + SIGKILL.
pub const ABNORMAL_EXIT_CODE: i32 = 137;

/// Length of the short form of a container identifier.
pub const SHORT_ID_LEN: usize = 12;

/// Unique, immutable identifier of a container.
///
/// Identifiers are opaque strings; freshly generated ones are 64 lowercase
/// hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Generates a new random identifier.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::rng().random();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the short, user-facing form of the identifier.
    #[must_use]
    pub fn truncate(&self) -> &str {
        truncate_id(&self.0)
    }
}

/// Returns the first [`SHORT_ID_LEN`] characters of `id`.
#[must_use]
pub fn truncate_id(id: &str) -> &str {
    id.char_indices()
        .nth(SHORT_ID_LEN)
        .map_or(id, |(idx, _)| &id[..idx])
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContainerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Coarse container status, derived from [`State`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Never started.
    Created,
    /// Process is running.
    Running,
    /// Process is frozen.
    Paused,
    /// Being restarted by its policy.
    Restarting,
    /// Process has exited.
    Exited,
    /// Removal failed half-way.
    Dead,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Exited => "exited",
            Self::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Result of a container process exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Process exit code (128 + signal for signal deaths).
    pub exit_code: i32,
    /// Whether the kernel OOM killer ended the process.
    pub oom_killed: bool,
}

impl ExitStatus {
    /// Creates an exit status with the given code.
    #[must_use]
    pub const fn code(exit_code: i32) -> Self {
        Self {
            exit_code,
            oom_killed: false,
        }
    }
}

/// Persisted runtime state of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct State {
    /// Process is running.
    pub running: bool,
    /// Process is frozen.
    pub paused: bool,
    /// Being restarted by its policy.
    pub restarting: bool,
    /// Last exit was an OOM kill.
    #[serde(rename = "OOMKilled")]
    pub oom_killed: bool,
    /// Removal failed half-way.
    pub dead: bool,
    /// Host pid of the container's init process (0 when not running).
    pub pid: u32,
    /// Last exit code.
    pub exit_code: i32,
    /// Last start error.
    pub error: String,
    /// Last start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Last exit time.
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of policy restarts since the last manual start.
    pub restart_count: u32,
    /// The user stopped the container explicitly.
    pub has_been_manually_stopped: bool,
}

impl State {
    /// Returns the coarse status.
    #[must_use]
    pub const fn status(&self) -> ContainerStatus {
        if self.running {
            if self.paused {
                return ContainerStatus::Paused;
            }
            if self.restarting {
                return ContainerStatus::Restarting;
            }
            return ContainerStatus::Running;
        }
        if self.dead {
            return ContainerStatus::Dead;
        }
        if self.started_at.is_none() {
            return ContainerStatus::Created;
        }
        ContainerStatus::Exited
    }

    /// Marks the state running with `pid`.
    pub fn set_running(&mut self, pid: u32) {
        self.running = true;
        self.paused = false;
        self.restarting = false;
        self.exit_code = 0;
        self.oom_killed = false;
        self.error.clear();
        self.pid = pid;
        self.started_at = Some(Utc::now());
    }

    /// Marks the state stopped with the given exit status.
    pub fn set_stopped(&mut self, exit: &ExitStatus) {
        self.running = false;
        self.paused = false;
        self.restarting = false;
        self.pid = 0;
        self.exit_code = exit.exit_code;
        self.oom_killed = exit.oom_killed;
        self.finished_at = Some(Utc::now());
    }
}

/// Unix-style signals sent to container processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// Hangup.
    Hup,
    /// Interrupt.
    Int,
    /// Quit.
    Quit,
    /// Terminate (graceful stop).
    Term,
    /// Kill (immediate termination).
    Kill,
    /// User signal 1.
    Usr1,
    /// User signal 2.
    Usr2,
    /// Stop (pause).
    Stop,
    /// Continue (resume).
    Cont,
}

impl Signal {
    /// Returns the Unix signal number.
    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        match self {
            Self::Hup => 1,
            Self::Int => 2,
            Self::Quit => 3,
            Self::Term => 15,
            Self::Kill => 9,
            Self::Usr1 => 10,
            Self::Usr2 => 12,
            Self::Stop => 19,
            Self::Cont => 18,
        }
    }

    /// Creates a signal from a Unix signal number.
    #[must_use]
    pub const fn from_i32(sig: i32) -> Option<Self> {
        match sig {
            1 => Some(Self::Hup),
            2 => Some(Self::Int),
            3 => Some(Self::Quit),
            15 => Some(Self::Term),
            9 => Some(Self::Kill),
            10 => Some(Self::Usr1),
            12 => Some(Self::Usr2),
            19 => Some(Self::Stop),
            18 => Some(Self::Cont),
            _ => None,
        }
    }
}

/// Per-container restart rule, evaluated against the last exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "Name", rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart.
    #[default]
    No,
    /// Always restart.
    Always,
    /// Restart unless the user stopped the container.
    UnlessStopped,
    /// Restart after a non-zero exit, at most `maximum_retry_count` times
    /// (0 = unlimited).
    OnFailure {
        /// Retry cap.
        #[serde(default, rename = "MaximumRetryCount")]
        maximum_retry_count: u32,
    },
}

impl RestartPolicy {
    /// Returns true if a container that last ended in `state` should be
    /// restarted.
    #[must_use]
    pub const fn should_restart(&self, state: &State) -> bool {
        match self {
            Self::No => false,
            Self::Always => true,
            Self::UnlessStopped => !state.has_been_manually_stopped,
            Self::OnFailure {
                maximum_retry_count,
            } => {
                state.exit_code != 0
                    && (*maximum_retry_count == 0 || state.restart_count < *maximum_retry_count)
            }
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::No => f.write_str("no"),
            Self::Always => f.write_str("always"),
            Self::UnlessStopped => f.write_str("unless-stopped"),
            Self::OnFailure {
                maximum_retry_count: 0,
            } => f.write_str("on-failure"),
            Self::OnFailure {
                maximum_retry_count,
            } => write!(f, "on-failure:{maximum_retry_count}"),
        }
    }
}

impl FromStr for RestartPolicy {
    type Err = DaemonError;

    /// Parses `no`, `always`, `unless-stopped`, `on-failure` or
    /// `on-failure:N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, count) = match s.split_once(':') {
            Some((name, count)) => (name, Some(count)),
            None => (s, None),
        };
        match (name, count) {
            ("" | "no", None) => Ok(Self::No),
            ("always", None) => Ok(Self::Always),
            ("unless-stopped", None) => Ok(Self::UnlessStopped),
            ("on-failure", None) => Ok(Self::OnFailure {
                maximum_retry_count: 0,
            }),
            ("on-failure", Some(count)) => count
                .parse()
                .map(|maximum_retry_count| Self::OnFailure {
                    maximum_retry_count,
                })
                .map_err(|_| DaemonError::config(format!("maximum retry count must be an integer: {s}"))),
            (_, Some(_)) => Err(DaemonError::config(format!(
                "maximum retry count is only valid for on-failure: {s}"
            ))),
            _ => Err(DaemonError::config(format!("invalid restart policy {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique_hex() {
        let a = ContainerId::generate();
        let b = ContainerId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_truncate() {
        let id = ContainerId::new("0123456789abcdef");
        assert_eq!(id.truncate(), "0123456789ab");
        assert_eq!(truncate_id("abc"), "abc");
    }

    #[test]
    fn test_state_status() {
        let mut state = State::default();
        assert_eq!(state.status(), ContainerStatus::Created);

        state.set_running(42);
        assert_eq!(state.status(), ContainerStatus::Running);
        assert_eq!(state.pid, 42);

        state.paused = true;
        assert_eq!(state.status(), ContainerStatus::Paused);

        state.set_stopped(&ExitStatus::code(ABNORMAL_EXIT_CODE));
        assert_eq!(state.status(), ContainerStatus::Exited);
        assert_eq!(state.exit_code, 137);
        assert_eq!(state.pid, 0);
        assert!(!state.paused);
    }

    #[test]
    fn test_signal_conversion() {
        for sig in [Signal::Hup, Signal::Term, Signal::Kill, Signal::Cont] {
            assert_eq!(Signal::from_i32(sig.as_i32()), Some(sig));
        }
        assert_eq!(Signal::from_i32(999), None);
    }

    #[test]
    fn test_restart_policy_no() {
        let state = State {
            exit_code: 1,
            ..State::default()
        };
        assert!(!RestartPolicy::No.should_restart(&state));
    }

    #[test]
    fn test_restart_policy_always() {
        let state = State {
            has_been_manually_stopped: true,
            ..State::default()
        };
        assert!(RestartPolicy::Always.should_restart(&state));
    }

    #[test]
    fn test_restart_policy_unless_stopped() {
        let mut state = State::default();
        assert!(RestartPolicy::UnlessStopped.should_restart(&state));
        state.has_been_manually_stopped = true;
        assert!(!RestartPolicy::UnlessStopped.should_restart(&state));
    }

    #[test]
    fn test_restart_policy_on_failure() {
        let policy = RestartPolicy::OnFailure {
            maximum_retry_count: 3,
        };
        let mut state = State::default();
        assert!(!policy.should_restart(&state));

        state.exit_code = ABNORMAL_EXIT_CODE;
        assert!(policy.should_restart(&state));

        state.restart_count = 3;
        assert!(!policy.should_restart(&state));

        let unlimited = RestartPolicy::OnFailure {
            maximum_retry_count: 0,
        };
        assert!(unlimited.should_restart(&state));
    }

    #[test]
    fn test_restart_policy_parse() {
        assert_eq!("no".parse::<RestartPolicy>().unwrap(), RestartPolicy::No);
        assert_eq!("".parse::<RestartPolicy>().unwrap(), RestartPolicy::No);
        assert_eq!(
            "unless-stopped".parse::<RestartPolicy>().unwrap(),
            RestartPolicy::UnlessStopped
        );
        assert_eq!(
            "on-failure:5".parse::<RestartPolicy>().unwrap(),
            RestartPolicy::OnFailure {
                maximum_retry_count: 5
            }
        );
        assert!("on-failure:x".parse::<RestartPolicy>().is_err());
        assert!("always:3".parse::<RestartPolicy>().is_err());
        assert!("sometimes".parse::<RestartPolicy>().is_err());
    }

    #[test]
    fn test_restart_policy_display_parses_back() {
        for policy in [
            RestartPolicy::No,
            RestartPolicy::Always,
            RestartPolicy::UnlessStopped,
            RestartPolicy::OnFailure {
                maximum_retry_count: 0,
            },
            RestartPolicy::OnFailure {
                maximum_retry_count: 2,
            },
        ] {
            assert_eq!(policy.to_string().parse::<RestartPolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn test_restart_policy_serde_shape() {
        let json = serde_json::to_string(&RestartPolicy::OnFailure {
            maximum_retry_count: 2,
        })
        .unwrap();
        assert_eq!(json, r#"{"Name":"on-failure","MaximumRetryCount":2}"#);

        let policy: RestartPolicy = serde_json::from_str(r#"{"Name":"always"}"#).unwrap();
        assert_eq!(policy, RestartPolicy::Always);
    }
}
