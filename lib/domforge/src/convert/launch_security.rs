// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Confidential-computing launch security.

use bitflags::bitflags;
use slog::debug;

use domforge_api_types::LaunchSecurity as SpecLaunchSecurity;

use super::{Conversion, DomainBuilder};
use crate::arch::LaunchSecuritySupport;
use crate::descriptor::LaunchSecurity;

bitflags! {
    /// Guest policy bits handed to the SEV firmware at launch.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SevPolicy: u32 {
        /// Debugging of the guest is disallowed.
        const NO_DEBUG = 1 << 0;
        /// Guest register state is encrypted too (SEV-ES).
        const ENCRYPTED_STATE = 1 << 2;
    }
}

impl SevPolicy {
    /// Renders the policy the way the hypervisor expects it, e.g. `0x5`.
    pub fn to_hex(self) -> String {
        format!("{:#x}", self.bits())
    }
}

pub(super) fn mode_name(requested: &SpecLaunchSecurity) -> &'static str {
    match requested {
        SpecLaunchSecurity::Sev(_) => "sev",
        SpecLaunchSecurity::SecureExecution => "secure-execution",
    }
}

pub(super) fn convert_launch_security(
    conv: &Conversion<'_>,
    builder: &mut DomainBuilder,
) {
    let Some(LaunchSecuritySupport::Sev) = conv.launch_security else {
        return;
    };
    let Some(SpecLaunchSecurity::Sev(sev)) = &conv.spec.domain.launch_security
    else {
        return;
    };

    let mut policy = SevPolicy::NO_DEBUG;
    if sev.encrypted_state.unwrap_or(false) {
        policy |= SevPolicy::ENCRYPTED_STATE;
    }
    debug!(conv.log, "launching with SEV"; "policy" => ?policy);
    builder.descriptor_mut().launch_security =
        Some(LaunchSecurity { kind: "sev", policy: policy.to_hex() });
}

#[cfg(test)]
mod test {
    use super::super::convert;
    use super::super::test_support::*;
    use super::*;
    use crate::arch::Arch;
    use domforge_api_types::Sev;

    #[test]
    fn policy_strings() {
        assert_eq!(SevPolicy::NO_DEBUG.to_hex(), "0x1");
        assert_eq!(
            (SevPolicy::NO_DEBUG | SevPolicy::ENCRYPTED_STATE).to_hex(),
            "0x5"
        );
    }

    #[test]
    fn sev_element() {
        let mut spec = spec();
        spec.domain.launch_security =
            Some(SpecLaunchSecurity::Sev(Sev::default()));
        let domain =
            convert(&spec, &context(Arch::Amd64), &logger()).unwrap();
        assert_eq!(
            domain.launch_security,
            Some(LaunchSecurity { kind: "sev", policy: "0x1".into() })
        );

        spec.domain.launch_security =
            Some(SpecLaunchSecurity::Sev(Sev { encrypted_state: Some(true) }));
        let domain =
            convert(&spec, &context(Arch::Amd64), &logger()).unwrap();
        assert_eq!(domain.launch_security.unwrap().policy, "0x5");
    }

    #[test]
    fn secure_execution_has_no_element() {
        let mut spec = spec();
        spec.domain.launch_security = Some(SpecLaunchSecurity::SecureExecution);
        let domain =
            convert(&spec, &context(Arch::S390x), &logger()).unwrap();
        assert_eq!(domain.launch_security, None);
        assert_eq!(
            mode_name(&SpecLaunchSecurity::SecureExecution),
            "secure-execution"
        );
    }
}
