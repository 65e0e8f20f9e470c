//! Fall-device relay.
//!
//! The waist device reports `F Fall` when it detects a fall, followed by
//! `F <Posture> <Motion>` describing the wearer afterwards. Each line maps
//! straight to bus tuples; nothing is carried between lines.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{HmpError, Result};
use crate::sensing::transport::LineTransport;
use crate::sinks::{Notification, TupleBus};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const FALL_TAG: char = 'F';
pub const ALARM_KEYWORD: &str = "Fall";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallNotice {
    Alarm(String),
    Posture(String),
    WaistMotion(String),
}

impl FallNotice {
    pub fn key(&self) -> &'static str {
        match self {
            FallNotice::Alarm(_) => "Fall.Alarm",
            FallNotice::Posture(_) => "Fall.Posture",
            FallNotice::WaistMotion(_) => "Fall.Waist_motion",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            FallNotice::Alarm(value)
            | FallNotice::Posture(value)
            | FallNotice::WaistMotion(value) => value,
        }
    }

    pub fn to_notification(&self) -> Notification {
        Notification::new(self.key(), self.value())
    }
}

/// Translate one fall-device line into its notices.
pub fn parse_fall_line(line: &str) -> Result<Vec<FallNotice>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut chars = line.chars();
    match chars.next() {
        Some(FALL_TAG) => {}
        Some(_) => return Err(HmpError::malformed(line, "not a fall report")),
        None => return Err(HmpError::malformed(line, "empty line")),
    }

    let payload = chars.as_str();
    if !payload.starts_with(char::is_whitespace) {
        return Err(HmpError::malformed(line, "tag must be followed by a space"));
    }

    let tokens: Vec<&str> = payload.split_whitespace().collect();
    match tokens.as_slice() {
        [keyword] if *keyword == ALARM_KEYWORD => Ok(vec![FallNotice::Alarm(keyword.to_string())]),
        [posture, motion] => Ok(vec![
            FallNotice::Posture(posture.to_string()),
            FallNotice::WaistMotion(motion.to_string()),
        ]),
        _ => Err(HmpError::malformed(
            line,
            format!("expected `{ALARM_KEYWORD}` or posture and motion, got {} tokens", tokens.len()),
        )),
    }
}

/// Parse a report and put its notices on the bus. Nothing is published for a
/// malformed line.
pub fn publish_fall(line: &str, bus: &dyn TupleBus) -> Result<Vec<FallNotice>> {
    let notices = parse_fall_line(line)?;
    for notice in &notices {
        match notice {
            FallNotice::Alarm(_) => log_warn!("Alarm: {}", notice.value()),
            _ => log_info!("{}: {}", notice.key(), notice.value()),
        }
        bus.publish(notice.to_notification());
    }
    Ok(notices)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallSummary {
    pub reports: u64,
    pub alarms: u64,
    pub malformed: u64,
    pub recovered_errors: u64,
}

/// Relay fall reports from a dedicated device until cancelled or the
/// transport ends.
pub fn standalone_fall<T>(
    transport: &mut T,
    bus: &dyn TupleBus,
    cancel: &CancellationToken,
) -> FallSummary
where
    T: LineTransport + ?Sized,
{
    let mut summary = FallSummary::default();

    while !cancel.is_cancelled() {
        let line = match transport.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) if err.is_recoverable() => {
                log_warn!("{err}; retrying");
                summary.recovered_errors += 1;
                continue;
            }
            Err(err) => {
                log_error!("stopping fall relay: {err}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match publish_fall(&line, bus) {
            Ok(notices) => {
                summary.reports += 1;
                if notices.iter().any(|n| matches!(n, FallNotice::Alarm(_))) {
                    summary.alarms += 1;
                }
            }
            Err(err) => {
                log_warn!("skipping line: {err}");
                summary.malformed += 1;
            }
        }
    }

    log_info!(
        "fall relay stopped: {} reports, {} alarms, {} malformed",
        summary.reports,
        summary.alarms,
        summary.malformed
    );
    summary
}
