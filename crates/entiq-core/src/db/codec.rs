//! Module: db::codec
//! Responsibility: binary key/value layouts read from collaborator indices.
//! Does not own: index storage or cursor positioning.
//! Boundary: the only place raw cursor bytes become `EntityId`s.
//!
//! Layouts:
//! - entity index key: local id, 8 bytes big-endian
//! - link index key: source local id, 8 bytes big-endian
//! - link index value: target type id (4 bytes BE) ++ target local id (8 bytes BE)
//!
//! Big-endian keeps byte order equal to numeric order.

use crate::{
    db::identity::{EntityId, EntityTypeId},
    error::InternalError,
};

pub const LOCAL_ID_LEN: usize = 8;
pub const LINK_TARGET_LEN: usize = 4 + LOCAL_ID_LEN;

#[must_use]
pub const fn encode_local_id(local_id: u64) -> [u8; LOCAL_ID_LEN] {
    local_id.to_be_bytes()
}

pub fn decode_local_id(bytes: &[u8]) -> Result<u64, InternalError> {
    let raw: [u8; LOCAL_ID_LEN] = bytes.try_into().map_err(|_| {
        InternalError::index_corruption(format!(
            "entity key must be {LOCAL_ID_LEN} bytes, found {}",
            bytes.len()
        ))
    })?;

    Ok(u64::from_be_bytes(raw))
}

/// Decode one entity index key into an id of `type_id`.
pub fn decode_entity_key(type_id: EntityTypeId, key: &[u8]) -> Result<EntityId, InternalError> {
    Ok(EntityId::new(type_id, decode_local_id(key)?))
}

#[must_use]
pub fn encode_link_target(target: EntityId) -> [u8; LINK_TARGET_LEN] {
    let mut out = [0u8; LINK_TARGET_LEN];
    out[..4].copy_from_slice(&target.type_id().to_be_bytes());
    out[4..].copy_from_slice(&target.local_id().to_be_bytes());

    out
}

pub fn decode_link_target(bytes: &[u8]) -> Result<EntityId, InternalError> {
    if bytes.len() != LINK_TARGET_LEN {
        return Err(InternalError::index_corruption(format!(
            "link target must be {LINK_TARGET_LEN} bytes, found {}",
            bytes.len()
        )));
    }

    let (type_bytes, local_bytes) = bytes.split_at(4);
    let mut raw_type = [0u8; 4];
    raw_type.copy_from_slice(type_bytes);

    Ok(EntityId::new(
        u32::from_be_bytes(raw_type),
        decode_local_id(local_bytes)?,
    ))
}

///
/// TESTS
///
