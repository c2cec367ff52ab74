use std::fmt;

/// Which side of the handshake this endpoint took. Fixes the masking
/// direction for the life of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Clients mask every frame they send.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Self::Client)
    }

    /// Servers require every frame they receive to be masked.
    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        !self.must_mask()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_side_masks() {
        for role in [Role::Client, Role::Server] {
            assert_ne!(role.must_mask(), role.expects_masked(), "{role}");
        }
        assert!(Role::Client.must_mask());
    }
}
