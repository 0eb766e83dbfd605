use std::fmt::{Debug, Formatter};


/// A [ServiceId] names a logical stream endpoint on a node - each benchmark protocol listens
///  under its own well-known id, and a connecting peer announces the id it wants as the first
///  thing on the wire.
///
/// An id is technically a u64, but it is intended to be used as a sequence of up to eight ASCII
///  characters to give it a human-readable name, both for uniqueness and for debugging at the
///  wire level.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ServiceId(pub u64);

impl ServiceId {
    pub const fn new(value: &[u8; 8]) -> ServiceId {
        Self(u64::from_be_bytes(*value))
    }
}

impl Debug for ServiceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.to_be_bytes();
        let used = bytes.iter()
            .position(|&b| b == 0)
            .map(|len| &bytes[..len])
            .unwrap_or(&bytes);

        let string_repr = std::str::from_utf8(used).unwrap_or("???");

        write!(f, "0x{:016X}({:?})", self.0, string_repr)
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::abc(ServiceId::new(b"abc\0\0\0\0\0"), "0x6162630000000000(\"abc\")")]
    #[case::empty(ServiceId::new(b"\0\0\0\0\0\0\0\0"), "0x0000000000000000(\"\")")]
    fn test_id_debug(#[case] id: ServiceId, #[case] expected: &str) {
        let formatted = format!("{:?}", id);
        assert_eq!(&formatted, expected);
    }
}
