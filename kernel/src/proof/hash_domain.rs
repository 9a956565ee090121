//! Domain separators for every hash the pipeline computes.
//!
//! A digest is only meaningful together with the domain it was taken under:
//! a Merkle leaf can never be confused with a receipt self-hash or a batch
//! content hash, even over identical bytes. New domains are added to the
//! single list below; the enum, `as_bytes()`, `ALL` and `Display` follow.

macro_rules! define_hash_domains {
    (
        $(
            $(#[$meta:meta])*
            $variant:ident => $bytes:expr
        ),+ $(,)?
    ) => {
        /// Prefix selected for [`super::hash::canonical_hash`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum HashDomain {
            $(
                $(#[$meta])*
                $variant,
            )+
        }

        impl HashDomain {
            /// Null-terminated separator bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &'static [u8] {
                match self {
                    $( Self::$variant => $bytes, )+
                }
            }

            pub const ALL: &[HashDomain] = &[
                $( Self::$variant, )+
            ];
        }

        impl core::fmt::Display for HashDomain {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self {
                    $( Self::$variant => write!(f, stringify!($variant)), )+
                }
            }
        }
    };
}

define_hash_domains! {
    // Dual hash

    /// Record batch, records in submission order.
    BatchOrder => b"EVIDENTIA::BATCH_ORDER::V1\0",

    /// Record batch, records as a sorted multiset.
    BatchContent => b"EVIDENTIA::BATCH_CONTENT::V1\0",

    /// Arbitrary JSON payload, as given.
    PayloadOrder => b"EVIDENTIA::PAYLOAD_ORDER::V1\0",

    /// Arbitrary JSON payload with every array sorted.
    PayloadContent => b"EVIDENTIA::PAYLOAD_CONTENT::V1\0",

    // Ledger

    /// Receipt self-hash over `(receipt_type, payload, previous_hash)`.
    ReceiptSelf => b"EVIDENTIA::RECEIPT_SELF::V1\0",

    /// Merkle leaf (receipt self-hash).
    MerkleLeaf => b"EVIDENTIA::MERKLE_LEAF::V1\0",

    /// Merkle interior node.
    MerkleNode => b"EVIDENTIA::MERKLE_NODE::V1\0",

    /// Root of an anchor cycle with no leaves.
    MerkleEmpty => b"EVIDENTIA::MERKLE_EMPTY::V1\0",

    /// Receipt schema document.
    ReceiptSchema => b"EVIDENTIA::RECEIPT_SCHEMA::V1\0",

    // Harness

    /// Pipeline configuration snapshot.
    ConfigSnapshot => b"EVIDENTIA::CONFIG_SNAPSHOT::V1\0",

    /// Rendered downstream output document.
    OutputDocument => b"EVIDENTIA::OUTPUT_DOCUMENT::V1\0",
}
