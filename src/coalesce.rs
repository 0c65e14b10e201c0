//! Address coalescing: sparse tag addresses -> bounded read requests.

use serde::Serialize;

/// One register-read request on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadRequest {
    /// First register address to read
    pub start: u16,
    /// Number of registers to read
    pub count: u16,
}

impl ReadRequest {
    /// Whether an address falls inside this request's span.
    pub fn contains(&self, address: u16) -> bool {
        address >= self.start && u32::from(address) < u32::from(self.start) + u32::from(self.count)
    }
}

/// Coalesce a sparse, sorted-or-not set of addresses into an ordered list of
/// read requests of at most `packet_size` registers each.
///
/// The span from the minimum to the maximum address is divided into
/// consecutive full chunks of `packet_size` registers anchored at the
/// minimum; a remainder, if any, becomes one trailing request anchored so
/// that its end lands exactly on the maximum address. The trailing request
/// can overlap the last full chunk; overlapped registers are read twice with
/// identical results, which is accepted to keep request shapes stable.
///
/// Every input address is covered by at least one returned request. An empty
/// input yields an empty list.
pub fn address_map(addresses: &[u16], packet_size: u16) -> Vec<ReadRequest> {
    assert!(packet_size > 0, "packet_size must be positive");

    let (Some(&min), Some(&max)) = (addresses.iter().min(), addresses.iter().max()) else {
        return Vec::new();
    };

    let span = u32::from(max) - u32::from(min) + 1;
    let full_chunks = span / u32::from(packet_size);
    let remainder = span % u32::from(packet_size);

    let mut requests = Vec::with_capacity(full_chunks as usize + 1);
    for i in 0..full_chunks {
        requests.push(ReadRequest {
            start: min + (i as u16) * packet_size,
            count: packet_size,
        });
    }
    if remainder > 0 {
        requests.push(ReadRequest {
            start: max - remainder as u16 + 1,
            count: remainder as u16,
        });
    }
    requests
}
