//! Child-process supervision.
//!
//! Every byte-moving tool (tar, dd, mkfs, unzip) runs as exactly one child
//! process at a time. The orchestrating thread blocks on a wait-with-poll
//! loop, emitting one progress tick per poll; nothing else runs while a
//! child is alive. Exit status is interpreted here and nowhere else.

use crate::config::RecoveryConfig;
use crate::errors::{RecoveryError, Result};
use crate::report::Reporter;
use spicarec_hal::{ChildStatus, CommandSpec, RecoveryHal};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    ExitedOk,
    ExitedWithCode(i32),
    KilledBySignal(i32),
    SpawnFailed(String),
    /// The configured hard bound elapsed and the child was killed. A hung
    /// tool would otherwise wedge the whole environment.
    TimedOut { after_secs: u64 },
}

impl ExitOutcome {
    /// Success is exactly a clean zero exit; everything else must be
    /// propagated by callers, never swallowed.
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::ExitedOk)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::ExitedOk => write!(f, "exited cleanly"),
            ExitOutcome::ExitedWithCode(code) => write!(f, "exit code {code}"),
            ExitOutcome::KilledBySignal(signal) => write!(f, "killed by signal {signal}"),
            ExitOutcome::SpawnFailed(cause) => write!(f, "failed to start: {cause}"),
            ExitOutcome::TimedOut { after_secs } => write!(f, "timed out after {after_secs}s"),
        }
    }
}

pub struct ProcessSupervisor<'a> {
    hal: &'a dyn RecoveryHal,
    poll_interval: Duration,
    timeout: Option<Duration>,
    dry_run: bool,
}

impl<'a> ProcessSupervisor<'a> {
    pub fn new(hal: &'a dyn RecoveryHal, config: &RecoveryConfig, dry_run: bool) -> Self {
        Self {
            hal,
            poll_interval: config.poll_interval(),
            timeout: config.process_timeout(),
            dry_run,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run `spec` to completion and classify its exit.
    pub fn run(
        &self,
        spec: &CommandSpec,
        cwd: Option<&Path>,
        reporter: &dyn Reporter,
    ) -> ExitOutcome {
        log::debug!("run: {} {}", spec.program, spec.args.join(" "));

        let mut child = match self.hal.spawn(spec, cwd, self.dry_run) {
            Ok(child) => child,
            Err(err) => return ExitOutcome::SpawnFailed(err.to_string()),
        };

        let started = Instant::now();
        loop {
            match child.try_wait() {
                Err(err) => return ExitOutcome::SpawnFailed(err.to_string()),
                Ok(Some(ChildStatus::Exited(0))) => return ExitOutcome::ExitedOk,
                Ok(Some(ChildStatus::Exited(code))) => return ExitOutcome::ExitedWithCode(code),
                Ok(Some(ChildStatus::Signaled(signal))) => {
                    return ExitOutcome::KilledBySignal(signal)
                }
                Ok(None) => {
                    if let Some(limit) = self.timeout {
                        if started.elapsed() >= limit {
                            let _ = child.kill();
                            return ExitOutcome::TimedOut {
                                after_secs: limit.as_secs(),
                            };
                        }
                    }
                    reporter.tick();
                    std::thread::sleep(self.poll_interval);
                }
            }
        }
    }

    /// Run `spec` and require a clean exit.
    pub fn run_checked(
        &self,
        spec: &CommandSpec,
        cwd: Option<&Path>,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        let outcome = self.run(spec, cwd, reporter);
        if !outcome.success() {
            return Err(RecoveryError::Process {
                program: spec.program.clone(),
                outcome,
            }
            .into());
        }
        Ok(())
    }
}
