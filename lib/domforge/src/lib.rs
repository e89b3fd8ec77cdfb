// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compiles a declarative VM spec into a hypervisor domain descriptor.
//!
//! [`convert`] takes a [`VmSpec`](domforge_api_types::VmSpec) and the
//! [`ConversionContext`] describing the host it will run on, and produces
//! a [`DomainDescriptor`] ready to be serialized for the hypervisor.
//! Conversions are pure functions of their inputs apart from the host
//! storage checks the context carries.

pub mod arch;
pub mod block_size;
pub mod context;
pub mod convert;
pub mod cpu_pool;
pub mod descriptor;
pub mod direct_io;
pub mod error;
pub mod iothreads;
pub mod naming;
pub mod paths;
pub mod pci;
pub mod topology;

pub use arch::Arch;
pub use block_size::{BlockSizeDetector, HostBlockSizeDetector};
pub use context::ConversionContext;
pub use convert::{convert, SevPolicy};
pub use descriptor::DomainDescriptor;
pub use direct_io::{DirectIoChecker, HostDirectIoChecker};
pub use error::{ConvertError, ErrorKind};
pub use pci::place_pci_devices_on_root_complex;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
