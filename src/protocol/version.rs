// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use crate::errors::{Error, Result};

pub(crate) const MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// The protocol versions this client can speak, oldest first so that `Ord`
/// can be used for feature gates (`version >= Version::V4_3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Version {
    V4_2,
    V4_3,
    V4_4,
    V5_0,
}

impl Version {
    /// The four `u32` slots of the handshake, most preferred first.
    /// Each version is encoded as `[0, 0, minor, major]`.
    pub(crate) fn proposal() -> [u8; 16] {
        [
            0, 0, 0, 5, // 5.0
            0, 0, 4, 4, // 4.4
            0, 0, 3, 4, // 4.3
            0, 0, 2, 4, // 4.2
        ]
    }

    pub(crate) fn from_handshake(reply: [u8; 4]) -> Result<Self> {
        match reply {
            [0, 0, 0, 0] => Err(Error::config(
                "the server supports none of the proposed protocol versions",
            )),
            [0, 0, 2, 4] => Ok(Version::V4_2),
            [0, 0, 3, 4] => Ok(Version::V4_3),
            [0, 0, 4, 4] => Ok(Version::V4_4),
            [0, 0, 0, 5] => Ok(Version::V5_0),
            [b'H', b'T', b'T', b'P'] => Err(Error::config(
                "the server answered with HTTP; this looks like a Bolt URI pointing at the \
                 HTTP port",
            )),
            other => Err(Error::protocol(format!(
                "unexpected handshake reply {other:02X?}"
            ))),
        }
    }

    pub(crate) fn tuple(&self) -> (u8, u8) {
        match self {
            Version::V4_2 => (4, 2),
            Version::V4_3 => (4, 3),
            Version::V4_4 => (4, 4),
            Version::V5_0 => (5, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case([0, 0, 2, 4], Version::V4_2)]
    #[case([0, 0, 3, 4], Version::V4_3)]
    #[case([0, 0, 4, 4], Version::V4_4)]
    #[case([0, 0, 0, 5], Version::V5_0)]
    fn handshake_reply_maps_to_version(#[case] reply: [u8; 4], #[case] expected: Version) {
        assert_eq!(Version::from_handshake(reply).unwrap(), expected);
    }

    #[test]
    fn rejected_handshake_is_a_config_error() {
        assert!(matches!(
            Version::from_handshake([0, 0, 0, 0]),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn versions_order_by_capability() {
        assert!(Version::V4_2 < Version::V4_3);
        assert!(Version::V4_4 < Version::V5_0);
        assert!(Version::V4_3 >= Version::V4_3);
    }

    #[test]
    fn proposal_offers_all_supported_versions() {
        let proposal = Version::proposal();
        for version in [[0, 0, 0, 5], [0, 0, 4, 4], [0, 0, 3, 4], [0, 0, 2, 4]] {
            assert!(proposal.chunks(4).any(|slot| slot == version));
        }
    }
}
