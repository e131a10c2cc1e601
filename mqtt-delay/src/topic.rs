//! Control-topic grammar and topic-filter matching.
//!
//! A control topic encodes a delayed republish:
//! `<base>[/reset]/<period>/<target...>`, optionally preceded by a single
//! routing prefix level (`+/<base>/...` in the subscription). The parser is
//! prefix-agnostic: it locates the first path level equal to the configured
//! control-root token and reads the rest from there.

use bytes::Bytes;

use crate::types::{DelayRequest, TopicName};
use crate::{DelayError, Result};

///Parse a control topic into a `DelayRequest` carrying `payload`.
///
///Every malformed shape maps to `DelayError::Parse`; callers drop the
///message and log, nothing here is fatal.
pub fn parse(base: &str, control_topic: &str, payload: Bytes) -> Result<DelayRequest> {
    let mut levels = control_topic.split('/');
    if !levels.any(|l| l == base) {
        return Err(DelayError::Parse(format!(
            "control root {:?} not found in topic {:?}",
            base, control_topic
        )));
    }

    let mut period_level = levels
        .next()
        .ok_or_else(|| DelayError::Parse(format!("period missing in topic {:?}", control_topic)))?;
    let reset = period_level == "reset";
    if reset {
        period_level = levels
            .next()
            .ok_or_else(|| DelayError::Parse(format!("period missing in topic {:?}", control_topic)))?;
    }

    if period_level.is_empty() || !period_level.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DelayError::Parse(format!(
            "invalid delay period {:?} in topic {:?}",
            period_level, control_topic
        )));
    }
    let period = period_level.parse::<u64>().map_err(|_| {
        DelayError::Parse(format!("delay period {:?} out of range in topic {:?}", period_level, control_topic))
    })?;

    let target_topic = levels.collect::<Vec<_>>().join("/");
    if target_topic.is_empty() {
        return Err(DelayError::Parse(format!("target topic missing in topic {:?}", control_topic)));
    }
    if target_topic.contains(['#', '+']) {
        return Err(DelayError::Parse(format!(
            "target topic {:?} contains wildcard characters",
            target_topic
        )));
    }

    Ok(DelayRequest { target_topic: TopicName::from(target_topic), period, reset, payload })
}

///Match a concrete topic name against an MQTT topic filter (`+` single
///level, `#` remaining levels). Topics starting with `$` are never matched
///by a leading wildcard.
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }
    let mut f = filter.split('/');
    let mut t = topic.split('/');
    loop {
        match (f.next(), t.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(fl), Some(tl)) if fl == tl => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
