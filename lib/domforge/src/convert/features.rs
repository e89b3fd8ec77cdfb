// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hypervisor features and Hyper-V enlightenments.

use slog::warn;

use domforge_api_types::{Bootloader, FeatureState as SpecFeature, HyperV};
use domforge_types::OnOff;

use super::{Conversion, DomainBuilder};
use crate::descriptor::{
    FeatureState, Features, HyperVFeatures, HyperVSpinlocks, HyperVVendorId,
    KvmFeatures, Present,
};

fn state(feature: Option<&SpecFeature>) -> Option<FeatureState> {
    feature.map(|f| FeatureState::new(f.enabled()))
}

fn hyperv_features(hyperv: &HyperV) -> HyperVFeatures {
    HyperVFeatures {
        mode: None,
        relaxed: state(hyperv.relaxed.as_ref()),
        vapic: state(hyperv.vapic.as_ref()),
        spinlocks: hyperv.spinlocks.map(|s| HyperVSpinlocks {
            state: s.enabled.unwrap_or(true).into(),
            retries: s.retries,
        }),
        vpindex: state(hyperv.vpindex.as_ref()),
        runtime: state(hyperv.runtime.as_ref()),
        synic: state(hyperv.synic.as_ref()),
        stimer: state(hyperv.synictimer.as_ref()),
        reset: state(hyperv.reset.as_ref()),
        vendor_id: hyperv.vendor_id.as_ref().map(|value| HyperVVendorId {
            state: OnOff::On,
            value: value.clone(),
        }),
        frequencies: state(hyperv.frequencies.as_ref()),
        reenlightenment: state(hyperv.reenlightenment.as_ref()),
        tlbflush: state(hyperv.tlbflush.as_ref()),
        ipi: state(hyperv.ipi.as_ref()),
        evmcs: state(hyperv.evmcs.as_ref()),
    }
}

/// Whether the guest boots EFI with secure boot, which needs SMM.
fn secure_boot(conv: &Conversion<'_>) -> bool {
    let firmware = conv.spec.domain.firmware.as_ref();
    match firmware.and_then(|f| f.bootloader.as_ref()) {
        Some(Bootloader::Efi(efi)) => efi.secure_boot(),
        Some(Bootloader::Bios(_)) | None => false,
    }
}

pub(super) fn convert_features(
    conv: &Conversion<'_>,
    builder: &mut DomainBuilder,
) {
    let arch = conv.arch();
    let requested = conv.spec.domain.features.clone().unwrap_or_default();

    let acpi = requested.acpi.map_or(true, |f| f.enabled());
    let smm = requested.smm.map_or(false, |f| f.enabled())
        || (secure_boot(conv) && arch.supports_smm());

    let hyperv = if requested.hyperv_passthrough.is_some_and(|f| f.enabled()) {
        Some(HyperVFeatures {
            mode: Some("passthrough"),
            ..Default::default()
        })
    } else {
        requested.hyperv.as_ref().map(hyperv_features)
    };
    let hyperv = match hyperv {
        Some(_) if !arch.supports_hyperv() => {
            warn!(conv.log, "Hyper-V enlightenments unsupported, ignoring");
            None
        }
        other => other,
    };

    let realtime = conv
        .spec
        .domain
        .cpu
        .as_ref()
        .is_some_and(|c| c.realtime.is_some());

    builder.descriptor_mut().features = Features {
        acpi: (acpi && arch.supports_acpi()).then_some(Present {}),
        apic: requested
            .apic
            .is_some_and(|f| f.enabled())
            .then_some(Present {}),
        smm: smm.then_some(Present {}),
        pvspinlock: state(requested.pvspinlock.as_ref()),
        kvm: requested
            .kvm_hidden
            .map(|hidden| KvmFeatures { hidden: FeatureState::new(hidden) }),
        hyperv,
        vmport: arch.supports_vmport().then(|| FeatureState::new(false)),
        pmu: realtime.then(|| FeatureState::new(false)),
    };
}
