//! VXLAN naming and deterministic id derivation: the id is a stable
//! hash of the sorted pair of site ids, mod 2^24.

use blake3::Hasher;

pub fn vxlan_interface_name(remote_site: &str) -> String {
    format!("vxlan-{remote_site}")
}

/// `stable_hash(min(a,b) + "-" + max(a,b)) mod 2^24`.
pub fn vxlan_id_for(site_a: &str, site_b: &str) -> u32 {
    let (lo, hi) = if site_a <= site_b {
        (site_a, site_b)
    } else {
        (site_b, site_a)
    };
    let key = format!("{lo}-{hi}");
    let mut hasher = Hasher::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    let value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    value % (1 << 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_deterministic() {
        assert_eq!(vxlan_id_for("a", "b"), vxlan_id_for("a", "b"));
    }

    #[test]
    fn interface_name_follows_convention() {
        assert_eq!(vxlan_interface_name("edge02"), "vxlan-edge02");
    }
}
