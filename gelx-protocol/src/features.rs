/// A negotiated protocol version.
///
/// The client currently speaks versions 1.0 through
/// [`ProtocolVersion::current`]. Pre-1.0 servers (the legacy line with
/// numeric header maps) are refused during the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub(crate) major_ver: u16,
    pub(crate) minor_ver: u16,
}

impl ProtocolVersion {
    pub fn current() -> ProtocolVersion {
        ProtocolVersion {
            major_ver: 3,
            minor_ver: 0,
        }
    }
    pub fn minimum() -> ProtocolVersion {
        ProtocolVersion {
            major_ver: 1,
            minor_ver: 0,
        }
    }
    pub fn new(major_ver: u16, minor_ver: u16) -> ProtocolVersion {
        debug_assert!(
            major_ver >= 1,
            "Attempted to create a legacy protocol version"
        );
        ProtocolVersion {
            major_ver,
            minor_ver,
        }
    }
    /// A version as offered by a server, possibly unsupported.
    pub fn offered(major_ver: u16, minor_ver: u16) -> ProtocolVersion {
        ProtocolVersion {
            major_ver,
            minor_ver,
        }
    }
    pub fn version_tuple(&self) -> (u16, u16) {
        (self.major_ver, self.minor_ver)
    }
    /// Whether descriptors are length-prefixed and scalar descriptors
    /// carry names and ancestor chains.
    pub fn is_2(&self) -> bool {
        self.major_ver >= 2
    }
    /// Whether messages carry string-keyed annotation maps and the
    /// input-language byte.
    pub fn is_3(&self) -> bool {
        self.major_ver >= 3
    }
    pub fn is_at_least(&self, major_ver: u16, minor_ver: u16) -> bool {
        self.major_ver > major_ver || self.major_ver == major_ver && self.minor_ver >= minor_ver
    }
    pub fn is_at_most(&self, major_ver: u16, minor_ver: u16) -> bool {
        self.major_ver < major_ver || self.major_ver == major_ver && self.minor_ver <= minor_ver
    }
    pub fn supported(&self) -> bool {
        let min = ProtocolVersion::minimum();
        self.is_at_least(min.major_ver, min.minor_ver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_gates() {
        assert!(ProtocolVersion::new(3, 0).is_3());
        assert!(ProtocolVersion::new(3, 0).is_2());
        assert!(ProtocolVersion::new(2, 0).is_2());
        assert!(!ProtocolVersion::new(2, 0).is_3());
        assert!(!ProtocolVersion::new(1, 0).is_2());
    }

    #[test]
    fn minimum_supported() {
        assert!(ProtocolVersion::new(1, 0).supported());
        assert!(ProtocolVersion::current().supported());
        assert!(!(ProtocolVersion {
            major_ver: 0,
            minor_ver: 13
        })
        .supported());
    }
}
