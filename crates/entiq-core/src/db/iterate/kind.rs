use crate::error::InternalError;

///
/// IterableKind
///
/// Closed set of iterable variants. The tag is the stable discriminant used
/// by handles and descriptions; it must never be reused for another variant.
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum IterableKind {
    Empty,
    AllEntities,
    EntitiesWithLink,
    FilterLinks,
    Union,
    Intersect,
}

impl IterableKind {
    pub const ALL: [Self; 6] = [
        Self::Empty,
        Self::AllEntities,
        Self::EntitiesWithLink,
        Self::FilterLinks,
        Self::Union,
        Self::Intersect,
    ];

    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Empty => 0x00,
            Self::AllEntities => 0x01,
            Self::EntitiesWithLink => 0x02,
            Self::FilterLinks => 0x03,
            Self::Union => 0x04,
            Self::Intersect => 0x05,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, InternalError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| {
                InternalError::handle_unsupported(format!("unknown iterable kind tag: {tag:#04x}"))
            })
    }

    /// Stable label used in canonical handle strings and metrics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::AllEntities => "all_entities",
            Self::EntitiesWithLink => "entities_with_link",
            Self::FilterLinks => "filter_links",
            Self::Union => "union",
            Self::Intersect => "intersect",
        }
    }

    /// Children of these kinds are unordered; handles sort them.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(self, Self::Union | Self::Intersect)
    }
}
