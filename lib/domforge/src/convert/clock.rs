// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Guest clock offset and timers.

use slog::{debug, warn};

use domforge_api_types::{ClockOffset, Timer as SpecTimer};

use super::{Conversion, DomainBuilder};
use crate::descriptor::{Clock, Timer};

const INVARIANT_TSC_FEATURE: &str = "invtsc";

fn timer(name: &'static str, spec: Option<&SpecTimer>) -> Option<Timer> {
    spec.map(|t| Timer {
        present: t.present.map(Into::into),
        tickpolicy: t.tick_policy.clone(),
        ..Timer::named(name)
    })
}

/// Whether the guest depends on a stable TSC frequency: either it was
/// promised an invariant TSC, or Hyper-V reenlightenment will report the
/// frequency to it.
fn needs_tsc_frequency(conv: &Conversion<'_>) -> bool {
    let invtsc = conv.spec.domain.cpu.as_ref().is_some_and(|cpu| {
        cpu.features.iter().any(|f| {
            f.name == INVARIANT_TSC_FEATURE
                && !matches!(f.policy.as_deref(), Some("disable" | "forbid"))
        })
    });
    let reenlightenment = conv
        .spec
        .domain
        .features
        .as_ref()
        .and_then(|f| f.hyperv.as_ref())
        .and_then(|h| h.reenlightenment)
        .is_some_and(|r| r.enabled());
    invtsc || reenlightenment
}

pub(super) fn convert_clock(
    conv: &Conversion<'_>,
    builder: &mut DomainBuilder,
) {
    let mut clock = conv.spec.domain.clock.as_ref().map(|requested| {
        let (offset, adjustment, timezone) = match &requested.offset {
            ClockOffset::Utc { offset_seconds } => {
                ("utc", offset_seconds.map(|s| s.to_string()), None)
            }
            ClockOffset::Timezone(zone) => {
                ("timezone", None, Some(zone.clone()))
            }
        };
        let timers = requested.timer.as_ref().map(|t| {
            [
                timer("hpet", t.hpet.as_ref()),
                timer("kvmclock", t.kvm.as_ref()),
                timer("pit", t.pit.as_ref()),
                timer("rtc", t.rtc.as_ref()),
                timer("hypervclock", t.hyperv.as_ref()),
            ]
        });
        Clock {
            offset,
            adjustment,
            timezone,
            timers: timers.into_iter().flatten().flatten().collect(),
        }
    });

    if conv.arch().supports_tsc_timer() && needs_tsc_frequency(conv) {
        match conv.spec.status.tsc_frequency {
            Some(frequency) => {
                debug!(conv.log, "exposing TSC frequency";
                    "hz" => frequency);
                let clock = clock.get_or_insert_with(|| Clock {
                    offset: "utc",
                    adjustment: None,
                    timezone: None,
                    timers: vec![],
                });
                clock.timers.push(Timer {
                    frequency: Some(frequency),
                    ..Timer::named("tsc")
                });
            }
            None => {
                warn!(conv.log, "TSC frequency unknown, not exposing it");
            }
        }
    }

    builder.descriptor_mut().clock = clock;
}
