//! Opaque-bytes helpers for [`super::Netobj`] and peer addresses.
//!
//! NLM treats owner handles, cookies and peer addresses as raw bytes, never
//! interpreting them beyond comparison and copying; the family-aware address
//! comparison below is the one place that looks past raw equality, so that a
//! client reconnecting on a new ephemeral port still maps onto the same host
//! record.

use std::net::{IpAddr, SocketAddr};

/// A peer transport address, paired with the `netid` string identifying the
/// transport family (`"tcp"`, `"tcp6"`, `"udp"`, ...), as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub netid: String,
    pub addr: SocketAddr,
}

impl PeerAddr {
    pub fn new(netid: impl Into<String>, addr: SocketAddr) -> Self {
        Self { netid: netid.into(), addr }
    }

    /// Compares two peer addresses the way the host registry's `(netid,
    /// addr)` index does: family (`netid`) first, then raw address bytes,
    /// ignoring port. Two connections from the same host on different
    /// ephemeral source ports therefore compare equal.
    pub fn same_host(&self, other: &Self) -> bool {
        self.netid == other.netid && same_ip(self.addr.ip(), other.addr.ip())
    }

    /// Total order used by the host registry's address-keyed index. Orders
    /// by `netid`, then by IP bytes, then by port — the port only matters
    /// for distinguishing entries that pass `same_host`'s coarser check
    /// (used purely to give the index a deterministic ordering, not to
    /// model any wire semantics).
    pub fn cmp_key(&self) -> (&str, IpAddr, u16) {
        (&self.netid, self.addr.ip(), self.addr.port())
    }
}

fn same_ip(a: IpAddr, b: IpAddr) -> bool {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => a == b,
        (IpAddr::V6(a), IpAddr::V6(b)) => a == b,
        _ => false,
    }
}

/// Encodes `sysid` into an owner handle for a lock we (as client) send
/// against a remote host. Glossary: `oh` "encodes the sysid of the remote
/// host we are locking against" for our own outbound locks (spec section 6).
pub fn encode_owner_sysid(sysid: u32, local_owner: &[u8]) -> Vec<u8> {
    let mut bytes = sysid.to_be_bytes().to_vec();
    bytes.extend_from_slice(local_owner);
    bytes
}

/// Extracts the sysid a previously-[`encode_owner_sysid`]'d owner handle
/// carries. Used by the inbound `GRANTED` handler (spec section 4.11) to
/// find the host without a name lookup.
pub fn decode_owner_sysid(owner: &[u8]) -> Option<u32> {
    if owner.len() < 4 {
        return None;
    }
    Some(u32::from_be_bytes(copy_fixed(&owner[..4])))
}

/// Copies a fixed-length opaque object (e.g. an `oh` sub-field) out of a
/// caller-supplied byte slice, zero-padding or truncating as needed. Mirrors
/// the defensive `bcopy`-with-`MIN(len, sizeof(dst))` pattern used throughout
/// the source for XDR opaque fields of bounded size.
pub fn copy_fixed<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut dst = [0u8; N];
    let n = src.len().min(N);
    dst[..n].copy_from_slice(&src[..n]);
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_host_ignores_port() {
        let a = PeerAddr::new("tcp", "10.0.0.1:4045".parse().unwrap());
        let b = PeerAddr::new("tcp", "10.0.0.1:51234".parse().unwrap());
        assert!(a.same_host(&b));
    }

    #[test]
    fn same_host_requires_matching_netid() {
        let a = PeerAddr::new("tcp", "10.0.0.1:4045".parse().unwrap());
        let b = PeerAddr::new("tcp6", "10.0.0.1:4045".parse().unwrap());
        assert!(!a.same_host(&b));
    }

    #[test]
    fn same_host_requires_matching_address() {
        let a = PeerAddr::new("tcp", "10.0.0.1:4045".parse().unwrap());
        let b = PeerAddr::new("tcp", "10.0.0.2:4045".parse().unwrap());
        assert!(!a.same_host(&b));
    }

    #[test]
    fn copy_fixed_pads_short_input() {
        let got: [u8; 8] = copy_fixed(&[1, 2, 3]);
        assert_eq!(got, [1, 2, 3, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn copy_fixed_truncates_long_input() {
        let got: [u8; 4] = copy_fixed(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(got, [1, 2, 3, 4]);
    }

    #[test]
    fn owner_sysid_round_trips() {
        let owner = encode_owner_sysid(0x1234, &[9, 9, 9]);
        assert_eq!(decode_owner_sysid(&owner), Some(0x1234));
    }

    #[test]
    fn owner_sysid_rejects_short_input() {
        assert_eq!(decode_owner_sysid(&[1, 2, 3]), None);
    }
}
