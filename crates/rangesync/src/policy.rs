//! Decide, per peer, if a file is transferred in parts or as a whole.
//!
//! Partial transfers are what makes swarming (pulling different parts of a
//! file from many peers at once) and delta-sync (pulling only the parts that
//! changed) possible. Both can be enabled separately for peers on the local
//! network and for peers over the internet.
use serde::{Deserialize, Serialize};

/// 50 KiB, smaller files are always transferred as a whole.
pub const DELTA_SYNC_MIN_FILE_SIZE: u64 = 50 * 1024;

/// How the peer is reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Link {
    Lan,
    Wan,
}

impl Link {
    pub fn is_lan(&self) -> bool {
        matches!(self, Link::Lan)
    }
}

impl From<bool> for Link {
    /// `true` means the peer is on the local network.
    fn from(is_lan: bool) -> Self {
        if is_lan {
            Link::Lan
        } else {
            Link::Wan
        }
    }
}

/// The `[partial_transfers]` table of the configuration file.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct PartialTransfers {
    pub swarming_on_lan: bool,
    pub swarming_on_wan: bool,
    pub delta_sync_on_lan: bool,
    pub delta_sync_on_wan: bool,
    pub delta_sync_min_file_size: u64,
    /// Payloads to peers over the internet are always compressed.
    pub compress_on_lan: bool,
}

impl Default for PartialTransfers {
    fn default() -> Self {
        Self {
            swarming_on_lan: true,
            swarming_on_wan: true,
            delta_sync_on_lan: true,
            delta_sync_on_wan: true,
            delta_sync_min_file_size: DELTA_SYNC_MIN_FILE_SIZE,
            compress_on_lan: false,
        }
    }
}

pub fn allows_swarming(link: Link, cfg: &PartialTransfers) -> bool {
    match link {
        Link::Lan => cfg.swarming_on_lan,
        Link::Wan => cfg.swarming_on_wan,
    }
}

pub fn allows_delta_sync(link: Link, cfg: &PartialTransfers) -> bool {
    match link {
        Link::Lan => cfg.delta_sync_on_lan,
        Link::Wan => cfg.delta_sync_on_wan,
    }
}

/// If the file should be tracked part by part for this peer. When this is
/// false the whole file is requested at once and no range state is kept.
pub fn use_partial_transfers(
    peer_supports_partial: bool,
    link: Link,
    cfg: &PartialTransfers,
) -> bool {
    peer_supports_partial
        && (allows_swarming(link, cfg) || allows_delta_sync(link, cfg))
}

/// Delta-sync is not worth the round trips for small files.
pub fn use_delta_sync(
    file_size: u64,
    link: Link,
    cfg: &PartialTransfers,
) -> bool {
    file_size >= cfg.delta_sync_min_file_size && allows_delta_sync(link, cfg)
}

pub fn use_compression(link: Link, cfg: &PartialTransfers) -> bool {
    !link.is_lan() || cfg.compress_on_lan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed() -> PartialTransfers {
        PartialTransfers {
            swarming_on_lan: true,
            swarming_on_wan: false,
            delta_sync_on_lan: false,
            delta_sync_on_wan: true,
            ..Default::default()
        }
    }

    #[test]
    fn flags_per_link() {
        let cfg = mixed();
        assert!(allows_swarming(Link::Lan, &cfg));
        assert!(!allows_swarming(Link::Wan, &cfg));
        assert!(!allows_delta_sync(Link::Lan, &cfg));
        assert!(allows_delta_sync(Link::Wan, &cfg));
    }

    #[test]
    fn partial_transfers() {
        let cfg = mixed();
        // via swarming
        assert!(use_partial_transfers(true, Link::Lan, &cfg));
        // via delta-sync
        assert!(use_partial_transfers(true, Link::Wan, &cfg));
        // the peer must support it
        assert!(!use_partial_transfers(false, Link::Lan, &cfg));
        assert!(!use_partial_transfers(false, Link::Wan, &cfg));
    }

    #[test]
    fn everything_disabled() {
        let cfg = PartialTransfers {
            swarming_on_lan: false,
            swarming_on_wan: false,
            delta_sync_on_lan: false,
            delta_sync_on_wan: false,
            ..Default::default()
        };
        assert!(!use_partial_transfers(true, Link::Lan, &cfg));
        assert!(!use_partial_transfers(true, Link::Wan, &cfg));
    }

    #[test]
    fn delta_sync_min_size() {
        let cfg = PartialTransfers::default();
        assert!(!use_delta_sync(DELTA_SYNC_MIN_FILE_SIZE - 1, Link::Wan, &cfg));
        assert!(use_delta_sync(DELTA_SYNC_MIN_FILE_SIZE, Link::Wan, &cfg));
        assert!(!use_delta_sync(10 << 20, Link::Lan, &mixed()));
    }

    #[test]
    fn compression() {
        let cfg = PartialTransfers::default();
        assert!(use_compression(Link::Wan, &cfg));
        assert!(!use_compression(Link::Lan, &cfg));
        assert!(use_compression(
            Link::Lan,
            &PartialTransfers { compress_on_lan: true, ..cfg }
        ));
    }

    #[test]
    fn link_from_bool() {
        assert_eq!(Link::from(true), Link::Lan);
        assert_eq!(Link::from(false), Link::Wan);
    }
}
