use std::{
    cmp, thread,
    time::{Duration, Instant},
};

use crate::{
    error::{MultidevError, Result},
    output::Output,
    platform::Job,
};

/// How often and how long to poll a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay after the first unfinished poll.
    pub interval: Duration,
    /// Upper bound the delay doubles towards.
    pub max_interval: Duration,
    /// Total time allowed before giving up.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Terminal state of a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Whether the job reported success.
    pub successful: bool,
    /// The job's final message.
    pub message: String,
}

/// Block until `job` finishes or `policy.timeout` elapses.
///
/// Only status checks are repeated; the operation itself is never resubmitted.
pub fn wait(
    job: &mut dyn Job,
    policy: &PollPolicy,
    operation: &str,
    output: &dyn Output,
) -> Result<JobOutcome> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut delay = policy.interval;
    let spinner = output.spinner(operation);

    let finished = loop {
        if job.poll()? {
            break true;
        }

        let now = Instant::now();
        if now >= deadline {
            break false;
        }

        thread::sleep(cmp::min(delay, deadline - now));
        delay = cmp::min(delay.saturating_mul(2), policy.max_interval);
        spinner.set_message(&format!("{operation} ({}s)", started.elapsed().as_secs()));
    };
    spinner.finish();

    if !finished {
        return Err(MultidevError::Timeout {
            operation: operation.to_string(),
            waited: started.elapsed(),
        });
    }

    Ok(JobOutcome {
        successful: job.is_successful(),
        message: job.message(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Quiet;

    /// Job that finishes after a fixed number of polls.
    struct CountdownJob {
        /// Polls remaining before completion; `None` never finishes.
        remaining: Option<usize>,
        /// Number of polls observed.
        polls: usize,
        /// Reported success flag.
        successful: bool,
    }

    impl Job for CountdownJob {
        fn poll(&mut self) -> Result<bool> {
            self.polls += 1;
            match self.remaining.as_mut() {
                Some(0) => Ok(true),
                Some(n) => {
                    *n -= 1;
                    Ok(false)
                }
                None => Ok(false),
            }
        }

        fn is_successful(&self) -> bool {
            self.successful
        }

        fn message(&self) -> String {
            if self.successful {
                "done".to_string()
            } else {
                "Environment is locked".to_string()
            }
        }
    }

    fn fast_policy(timeout: Duration) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
            timeout,
        }
    }

    #[test]
    fn waits_until_finished() {
        let mut job = CountdownJob {
            remaining: Some(3),
            polls: 0,
            successful: true,
        };
        let outcome = wait(&mut job, &fast_policy(Duration::from_secs(5)), "create", &Quiet).unwrap();
        assert_eq!(job.polls, 4);
        assert!(outcome.successful);
        assert_eq!(outcome.message, "done");
    }

    #[test]
    fn failed_job_reports_its_message() {
        let mut job = CountdownJob {
            remaining: Some(0),
            polls: 0,
            successful: false,
        };
        let outcome = wait(&mut job, &fast_policy(Duration::from_secs(5)), "delete", &Quiet).unwrap();
        assert!(!outcome.successful);
        assert_eq!(outcome.message, "Environment is locked");
    }

    #[test]
    fn unfinished_job_times_out() {
        let mut job = CountdownJob {
            remaining: None,
            polls: 0,
            successful: true,
        };
        let err = wait(
            &mut job,
            &fast_policy(Duration::from_millis(20)),
            "create feature",
            &Quiet,
        )
        .unwrap_err();
        match err {
            MultidevError::Timeout { operation, waited } => {
                assert_eq!(operation, "create feature");
                assert!(waited >= Duration::from_millis(20));
            }
            other => panic!("expected timeout, got {other}"),
        }
        assert!(job.polls > 1);
    }
}
