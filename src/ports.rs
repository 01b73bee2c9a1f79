//! Port assignment for new projects

use std::collections::HashSet;

use crate::error::{Error, Result};

/// Lowest port handed out when no floor is configured
pub const DEFAULT_PORT_FLOOR: u16 = 3000;

/// Return the smallest port `>= floor` that is not in `existing`.
///
/// Ports below `floor` are ignored. The only failure is running past
/// `u16::MAX`, which requires every port from `floor` upwards to be taken.
pub fn allocate(existing: &HashSet<u16>, floor: u16) -> Result<u16> {
    (floor..=u16::MAX)
        .find(|port| !existing.contains(port))
        .ok_or(Error::PortExhaustion(floor))
}
