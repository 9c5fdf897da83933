use std::thread;
use std::time::Duration;

use tracing::{error, info};

use crate::error::Result;

const MAX_REPORT_BYTES: usize = 2 * 1024 * 1024;

pub const NOTIFY_TRIES: u32 = 3;
pub const NOTIFY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Success,
    Error,
}

/// End-of-run report delivered through the configured notifier; the body is
/// the manifest log, capped so transports with message limits still accept it.
#[derive(Debug, Clone)]
pub struct Report {
    pub kind: ReportKind,
    pub subject: String,
    pub body: String,
}

impl Report {
    pub fn success(host: &str, body: String) -> Report {
        Report {
            kind: ReportKind::Success,
            subject: format!("backup complete: {}", host),
            body: truncate_body(body),
        }
    }

    pub fn error(host: &str, body: String) -> Report {
        Report {
            kind: ReportKind::Error,
            subject: format!("backup error: {}", host),
            body: truncate_body(body),
        }
    }
}

/// Delivery transport for end-of-run reports. Mail, webhooks and the like
/// live outside this crate behind this trait.
pub trait Notifier: Send + Sync {
    fn send(&self, report: &Report) -> Result<()>;
}

/// Default notifier: the report goes to the process log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, report: &Report) -> Result<()> {
        match report.kind {
            ReportKind::Success => info!("{}\n{}", report.subject, report.body),
            ReportKind::Error => error!("{}\n{}", report.subject, report.body),
        }
        Ok(())
    }
}

/// Deliver a report with retries, sleeping `delay * attempt` between tries.
/// Exhaustion is logged once and surfaced to the caller.
pub fn send_with_retry(
    notifier: &dyn Notifier,
    report: &Report,
    tries: u32,
    delay: Duration,
) -> Result<()> {
    let tries = tries.max(1);
    for attempt in 1..=tries {
        match notifier.send(report) {
            Ok(()) => return Ok(()),
            Err(err) => {
                if attempt == tries {
                    error!("could not deliver report {}: {}", report.subject, err);
                    return Err(err);
                }
                thread::sleep(delay * attempt);
            }
        }
    }
    unreachable!("retry loop returns on final attempt")
}

fn truncate_body(body: String) -> String {
    if body.len() <= MAX_REPORT_BYTES {
        return body;
    }
    let mut end = MAX_REPORT_BYTES;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
