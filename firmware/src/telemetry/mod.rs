//! Mirrors the decision loop's telemetry ring to the log transport.
//!
//! The ring lives in `intersection-core`; this module remembers which record
//! ids have already been printed and emits the rest through defmt on target or
//! stdout on host builds.

use intersection_core::telemetry::{
    EventId, TelemetryEventKind, TelemetryPayload, TelemetryRecord, TelemetryRecorder,
};

use crate::decisions::FirmwareInstant;

/// Tracks the next telemetry record that still needs to be logged.
pub struct TelemetryMirror {
    next_id: EventId,
    dropped: u32,
}

impl TelemetryMirror {
    pub const fn new() -> Self {
        Self {
            next_id: 0,
            dropped: 0,
        }
    }

    /// Records that fell out of the ring before they could be logged.
    pub const fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Emits every record newer than the last flush. Returns how many were logged.
    pub fn flush<const N: usize>(
        &mut self,
        recorder: &TelemetryRecorder<FirmwareInstant, N>,
    ) -> usize {
        let mut emitted = 0;
        let mut oldest_seen = None;

        for record in recorder.oldest_first() {
            oldest_seen.get_or_insert(record.id);
            if record.id < self.next_id {
                continue;
            }
            log_record(record);
            emitted += 1;
        }

        if let Some(oldest) = oldest_seen
            && oldest > self.next_id
        {
            let lost = oldest - self.next_id;
            self.dropped = self.dropped.saturating_add(lost);
            log_overrun(lost);
        }

        self.next_id = recorder.next_event_id();
        emitted
    }
}

impl Default for TelemetryMirror {
    fn default() -> Self {
        Self::new()
    }
}

fn log_record(record: &TelemetryRecord<FirmwareInstant>) {
    let timestamp_us = record.timestamp.as_micros();
    let code = record.event.to_raw();
    match record.details {
        TelemetryPayload::Light(light) => {
            let elapsed_us = light
                .elapsed_since_previous
                .map(|value| u64::try_from(value.as_micros()).unwrap_or(u64::MAX));
            emit_light(record.event, code, timestamp_us, elapsed_us);
        }
        TelemetryPayload::Decision(decision) => {
            emit_decision(record.event, code, timestamp_us, decision.weight);
        }
        TelemetryPayload::Snapshot(counts) => {
            emit_decision(record.event, code, timestamp_us, counts.demand_score());
        }
        TelemetryPayload::Request(request) => {
            emit_decision(
                record.event,
                code,
                timestamp_us,
                u32::from(request.queue_depth),
            );
        }
        TelemetryPayload::None => emit_plain(record.event, code, timestamp_us),
    }
}

#[cfg(target_os = "none")]
fn emit_light(event: TelemetryEventKind, code: u16, timestamp_us: u64, delta_us: Option<u64>) {
    if let Some(delta) = delta_us {
        defmt::info!(
            "telemetry:{} code={=u16:#x} t={}us Δ={}us",
            defmt::Display2Format(&event),
            code,
            timestamp_us,
            delta
        );
    } else {
        defmt::info!(
            "telemetry:{} code={=u16:#x} t={}us",
            defmt::Display2Format(&event),
            code,
            timestamp_us
        );
    }
}

#[cfg(not(target_os = "none"))]
fn emit_light(event: TelemetryEventKind, code: u16, timestamp_us: u64, delta_us: Option<u64>) {
    if let Some(delta) = delta_us {
        println!("telemetry:{event} code={code:#x} t={timestamp_us}us Δ={delta}us");
    } else {
        println!("telemetry:{event} code={code:#x} t={timestamp_us}us");
    }
}

#[cfg(target_os = "none")]
fn emit_decision(event: TelemetryEventKind, code: u16, timestamp_us: u64, weight: u32) {
    defmt::info!(
        "telemetry:{} code={=u16:#x} t={}us weight={}",
        defmt::Display2Format(&event),
        code,
        timestamp_us,
        weight
    );
}

#[cfg(not(target_os = "none"))]
fn emit_decision(event: TelemetryEventKind, code: u16, timestamp_us: u64, weight: u32) {
    println!("telemetry:{event} code={code:#x} t={timestamp_us}us weight={weight}");
}

#[cfg(target_os = "none")]
fn emit_plain(event: TelemetryEventKind, code: u16, timestamp_us: u64) {
    defmt::info!(
        "telemetry:{} code={=u16:#x} t={}us",
        defmt::Display2Format(&event),
        code,
        timestamp_us
    );
}

#[cfg(not(target_os = "none"))]
fn emit_plain(event: TelemetryEventKind, code: u16, timestamp_us: u64) {
    println!("telemetry:{event} code={code:#x} t={timestamp_us}us");
}

#[cfg(target_os = "none")]
fn log_overrun(lost: u32) {
    defmt::warn!("telemetry: {} records overwritten before logging", lost);
}

#[cfg(not(target_os = "none"))]
fn log_overrun(lost: u32) {
    println!("telemetry: {lost} records overwritten before logging");
}
