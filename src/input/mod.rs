// SPDX-License-Identifier: Apache-2.0

pub mod attributes;
pub mod finder;
pub mod fingerprint;
pub mod manager;
pub mod reader;
pub mod roller;

pub use attributes::{AttributeFlags, FileAttributes};
pub use finder::{FileFinder, GlobFileFinder};
pub use fingerprint::{DEFAULT_FINGERPRINT_SIZE, Fingerprint, MIN_FINGERPRINT_SIZE};
pub use manager::{Manager, ManagerSettings};
pub use reader::{EmitFunc, Reader, ReaderFactory};
pub use roller::Roller;
